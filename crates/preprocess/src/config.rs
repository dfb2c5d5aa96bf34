/// Input resolution the EfficientNet-B3 head was trained at.
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (300, 300);

/// Per-channel statistics the feature extractor was pretrained against.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
