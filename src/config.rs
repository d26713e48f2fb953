use crate::{MAX_CAPACITY, MINIMAL_CAPACITY};
use derive_builder::Builder;

/// Construction parameters for a [`ConsingMap`](crate::ConsingMap).
///
/// ```
/// use consing_map::{Config, ConsingMap};
///
/// let config = Config::builder()
///     .initial_capacity(1024)
///     .background_sweep(false)
///     .build()
///     .unwrap();
/// let map = ConsingMap::<String>::with_config(config);
/// assert_eq!(map.capacity(), 1024);
/// ```
#[derive(Clone, Debug, Builder)]
#[builder(pattern = "owned", build_fn(validate = "Self::validate"))]
pub struct Config {
    /// Initial number of buckets, rounded up to a power of two and never
    /// below `MINIMAL_CAPACITY`.
    #[builder(default = "MINIMAL_CAPACITY")]
    pub(crate) initial_capacity: usize,

    /// Whether the map registers with the process-wide sweeper. Without it,
    /// dropped entries are unlinked by [`ConsingMap::sweep`](crate::ConsingMap::sweep),
    /// before resizes, and by the next insert once more than a thousand of
    /// them are waiting.
    #[builder(default = "true")]
    pub(crate) background_sweep: bool,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub(crate) fn table_len(&self) -> usize {
        self.initial_capacity
            .clamp(MINIMAL_CAPACITY, MAX_CAPACITY)
            .next_power_of_two()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_capacity: MINIMAL_CAPACITY,
            background_sweep: true,
        }
    }
}

impl ConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.initial_capacity {
            Some(n) if n > MAX_CAPACITY => Err(format!(
                "initial capacity {n} exceeds the maximum of {MAX_CAPACITY}"
            )),
            _ => Ok(()),
        }
    }
}
