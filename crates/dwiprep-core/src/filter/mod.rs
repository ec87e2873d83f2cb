pub mod downsample;
pub mod resample;

pub use downsample::DownsampleFilter;
pub use resample::ResampleImageFilter;
