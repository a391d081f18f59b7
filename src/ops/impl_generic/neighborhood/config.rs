//! Launch tuning for the neighborhood attention AV kernels.

use serde::{Deserialize, Serialize};

use super::geometry::is_supported_kernel_size;
use super::tile::{MAX_TILE_THREADS, TileConfig, default_tile_config};
use crate::error::{Error, Result};

/// Launch configuration for the AV kernels
///
/// ```yaml
/// threads_per_block: 512
/// threads_per_block_half: 256
/// tiled: true
/// tiles:
///   - { kernel_size: 7, tile_y: 4, tile_x: 4, key_tile_y: 10, key_tile_x: 10 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NattenConfig {
    /// Logical threads per block for the generic full-precision kernels
    #[serde(default = "default_threads_per_block")]
    pub threads_per_block: usize,

    /// Logical threads per block for the generic half-precision kernels
    #[serde(default = "default_threads_per_block_half")]
    pub threads_per_block_half: usize,

    /// Allow the head-dim-32 tiled backward-to-attention kernels
    #[serde(default = "default_tiled")]
    pub tiled: bool,

    /// Overrides of the default tile table, by kernel size
    #[serde(default)]
    pub tiles: Vec<TileConfig>,
}

fn default_threads_per_block() -> usize {
    512
}

fn default_threads_per_block_half() -> usize {
    256
}

fn default_tiled() -> bool {
    true
}

impl Default for NattenConfig {
    fn default() -> Self {
        Self {
            threads_per_block: default_threads_per_block(),
            threads_per_block_half: default_threads_per_block_half(),
            tiled: default_tiled(),
            tiles: Vec::new(),
        }
    }
}

impl NattenConfig {
    /// Parse and validate a YAML config.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| Error::Config {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Config with the tiled kernels disabled.
    #[must_use]
    pub fn generic_only(mut self) -> Self {
        self.tiled = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads_per_block == 0 || self.threads_per_block_half == 0 {
            return Err(Error::Config {
                reason: "threads per block must be > 0".into(),
            });
        }
        for tile in &self.tiles {
            if !is_supported_kernel_size(tile.kernel_size) {
                return Err(Error::Config {
                    reason: format!(
                        "tile override for unsupported kernel size {}",
                        tile.kernel_size
                    ),
                });
            }
            if !tile.fits_block() {
                return Err(Error::Config {
                    reason: format!(
                        "tile {}x{} with key tile {}x{} exceeds {MAX_TILE_THREADS} threads per block for a {k}x{k} window",
                        tile.tile_y,
                        tile.tile_x,
                        tile.key_tile_y,
                        tile.key_tile_x,
                        k = tile.kernel_size
                    ),
                });
            }
            if !tile.covers_halo() {
                return Err(Error::Config {
                    reason: format!(
                        "tile {}x{} with key tile {}x{} cannot hold the halo of a {k}x{k} window",
                        tile.tile_y,
                        tile.tile_x,
                        tile.key_tile_y,
                        tile.key_tile_x,
                        k = tile.kernel_size
                    ),
                });
            }
        }
        Ok(())
    }

    /// Generic-kernel block size for a unit with `lanes` channels.
    pub fn threads_for_lanes(&self, lanes: usize) -> usize {
        if lanes > 1 {
            self.threads_per_block_half
        } else {
            self.threads_per_block
        }
    }

    /// Tile shape for `kernel_size`: the last override wins, then the default table.
    pub fn tile(&self, kernel_size: usize) -> Option<TileConfig> {
        self.tiles
            .iter()
            .rev()
            .find(|t| t.kernel_size == kernel_size)
            .copied()
            .or_else(|| default_tile_config(kernel_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NattenConfig::default();
        assert!(config.tiled);
        assert_eq!(config.threads_for_lanes(1), 512);
        assert_eq!(config.threads_for_lanes(2), 256);
        assert_eq!(config.tile(9), default_tile_config(9));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_with_override() {
        let yaml = r#"
threads_per_block: 128
tiles:
  - { kernel_size: 7, tile_y: 4, tile_x: 4, key_tile_y: 10, key_tile_x: 10 }
"#;
        let config = NattenConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.threads_per_block, 128);
        assert_eq!(config.threads_per_block_half, 256);
        assert!(config.tiled);
        let tile = config.tile(7).unwrap();
        assert_eq!((tile.tile_y, tile.key_tile_x), (4, 10));
        assert_eq!(config.tile(5), default_tile_config(5));
    }

    #[test]
    fn test_rejects_bad_configs() {
        assert!(matches!(
            NattenConfig::from_yaml("threads_per_block: 0"),
            Err(Error::Config { .. })
        ));
        let small_halo = "tiles:\n  - { kernel_size: 5, tile_y: 4, tile_x: 4, key_tile_y: 6, key_tile_x: 8 }";
        assert!(NattenConfig::from_yaml(small_halo).is_err());
        let unsupported = "tiles:\n  - { kernel_size: 3, tile_y: 4, tile_x: 4, key_tile_y: 6, key_tile_x: 6 }";
        assert!(NattenConfig::from_yaml(unsupported).is_err());
        assert!(NattenConfig::from_yaml("tiled: [").is_err());
    }

    #[test]
    fn test_rejects_oversized_tiles() {
        let huge = "tiles:\n  - { kernel_size: 13, tile_y: 1000000000, tile_x: 2, key_tile_y: 1000000012, key_tile_x: 14 }";
        let err = NattenConfig::from_yaml(huge).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("1024"));

        // 5x5 queries * 49 offsets = 1225 threads
        let over_block = "tiles:\n  - { kernel_size: 7, tile_y: 5, tile_x: 5, key_tile_y: 11, key_tile_x: 11 }";
        assert!(matches!(
            NattenConfig::from_yaml(over_block),
            Err(Error::Config { .. })
        ));

        let wide_keys = "tiles:\n  - { kernel_size: 5, tile_y: 2, tile_x: 2, key_tile_y: 6, key_tile_x: 100000 }";
        assert!(matches!(
            NattenConfig::from_yaml(wide_keys),
            Err(Error::Config { .. })
        ));

        let overflowing = format!(
            "tiles:\n  - {{ kernel_size: 5, tile_y: 2, tile_x: 2, key_tile_y: {m}, key_tile_x: {m} }}",
            m = usize::MAX
        );
        assert!(NattenConfig::from_yaml(&overflowing).is_err());

        // 4x4 queries * 49 offsets = 784 threads
        let at_limit = "tiles:\n  - { kernel_size: 7, tile_y: 4, tile_x: 4, key_tile_y: 10, key_tile_x: 10 }";
        assert!(NattenConfig::from_yaml(at_limit).is_ok());
    }

    #[test]
    fn test_generic_only() {
        let config = NattenConfig::default().generic_only();
        assert!(!config.tiled);
    }
}
