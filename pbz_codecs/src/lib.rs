mod deflate_codec;
mod gzip_codec;
mod lz4_codec;
mod passthrough;
mod zstd_codec;

pub use deflate_codec::DeflateCodec;
pub use gzip_codec::GzipCodec;
pub use lz4_codec::Lz4Codec;
pub use passthrough::PassThroughCodec;
pub use zstd_codec::ZstdCodec;

use pbz_core::Codec;
use std::sync::Arc;

/// Names accepted by [`codec_by_name`], default first.
pub const CODEC_NAMES: &[&str] = &["deflate", "gzip", "zstd", "lz4", "passthrough"];

/// Resolve a codec from its CLI name.
///
/// The container does not record which codec wrote it, so compress and
/// decompress must be given the same name. `level` is honoured by deflate,
/// gzip and zstd and ignored by the others.
pub fn codec_by_name(name: &str, level: Option<i32>) -> anyhow::Result<Arc<dyn Codec>> {
    match name {
        "deflate" | "d" => Ok(Arc::new(match level {
            Some(l) => DeflateCodec::new(flate_level(l)?),
            None => DeflateCodec::default(),
        })),
        "gzip" | "gz" => Ok(Arc::new(match level {
            Some(l) => GzipCodec::new(flate_level(l)?),
            None => GzipCodec::default(),
        })),
        "zstd" | "z" => Ok(Arc::new(match level {
            Some(l) => ZstdCodec::new(l),
            None => ZstdCodec::default(),
        })),
        "lz4" | "l" => Ok(Arc::new(Lz4Codec)),
        "passthrough" | "pass" | "none" => Ok(Arc::new(PassThroughCodec)),
        other => anyhow::bail!(
            "unknown codec '{}'. Valid options: {}",
            other,
            CODEC_NAMES.join(", ")
        ),
    }
}

fn flate_level(level: i32) -> anyhow::Result<u32> {
    match u32::try_from(level) {
        Ok(l) if l <= 9 => Ok(l),
        _ => anyhow::bail!("deflate/gzip level must be between 0 and 9, got {}", level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_name_resolves() {
        for name in CODEC_NAMES {
            let codec = codec_by_name(name, None).unwrap();
            assert_eq!(&codec.name(), name);
        }
    }

    #[test]
    fn unknown_name_lists_options() {
        let err = codec_by_name("brotli", None).err().unwrap().to_string();
        assert!(err.contains("deflate, gzip, zstd, lz4, passthrough"), "{err}");
    }

    #[test]
    fn flate_levels_are_range_checked() {
        assert!(codec_by_name("deflate", Some(9)).is_ok());
        assert!(codec_by_name("gzip", Some(10)).is_err());
        assert!(codec_by_name("deflate", Some(-1)).is_err());
    }

    #[test]
    fn roundtrip_every_codec() {
        let data: Vec<u8> = b"the quick brown fox jumps over the lazy dog. "
            .iter()
            .cycle()
            .take(10_000)
            .copied()
            .collect();
        for name in CODEC_NAMES {
            let codec = codec_by_name(name, None).unwrap();
            let packed = codec.compress_block(&data).unwrap();
            assert_eq!(codec.decompress_block(&packed).unwrap(), data, "{name}");
            // The read stage never emits empty blocks, but the primitive
            // must still accept one.
            let empty = codec.compress_block(&[]).unwrap();
            assert!(codec.decompress_block(&empty).unwrap().is_empty(), "{name}");
        }
    }

    #[test]
    fn corrupt_input_is_an_error() {
        // Small lz4 size prefix, then bytes no codec accepts.
        let mut garbage = vec![16u8, 0, 0, 0];
        garbage.extend([0xffu8; 60]);
        for name in ["deflate", "gzip", "zstd", "lz4"] {
            let codec = codec_by_name(name, None).unwrap();
            assert!(codec.decompress_block(&garbage).is_err(), "{name}");
        }
    }
}
