pub mod json_codec;

/// Marker for a type that can name itself, used for logging which codec a
/// component is configured with.
pub trait Codec {
    fn codec_name(&self) -> &'static str;
}
