use subpython_alloc::pool::HEADER_SIZE;
use subpython_alloc::{align_down, MIN_ALIGN};

/// The default size of the memory pool, in bytes
pub const DEFAULT_POOL_SIZE: usize = 1024;
/// The default number of slots the reference table starts out with
pub const DEFAULT_INITIAL_REFS: usize = 8;
/// The default recursion limit when printing nested values
pub const DEFAULT_MAX_PRINT_DEPTH: usize = 4;
/// The default smallest capacity of a dict's hash table
pub const DEFAULT_DICT_MIN_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("a pool of {pool_size} bytes is too small to hold a block header in each half")]
    PoolTooSmall { pool_size: usize },
    #[error("the minimum dict capacity must be non-zero")]
    ZeroDictCapacity,
}

/// Options which control how a [`Heap`](crate::Heap) is laid out and behaves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    /// Total size of the pool in bytes, both semispaces included
    pub pool_size: usize,
    /// Whether to stamp fresh and freed payloads with a sentinel pattern
    pub poison: bool,
    pub initial_refs: usize,
    pub max_print_depth: usize,
    pub dict_min_capacity: usize,
}
impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            poison: cfg!(debug_assertions),
            initial_refs: DEFAULT_INITIAL_REFS,
            max_print_depth: DEFAULT_MAX_PRINT_DEPTH,
            dict_min_capacity: DEFAULT_DICT_MIN_CAPACITY,
        }
    }
}
impl HeapConfig {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Default::default()
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_poison(mut self, poison: bool) -> Self {
        self.poison = poison;
        self
    }

    pub fn with_initial_refs(mut self, initial_refs: usize) -> Self {
        self.initial_refs = initial_refs;
        self
    }

    pub fn with_max_print_depth(mut self, depth: usize) -> Self {
        self.max_print_depth = depth;
        self
    }

    pub fn with_dict_min_capacity(mut self, capacity: usize) -> Self {
        self.dict_min_capacity = capacity;
        self
    }

    /// The usable pool size, rounded down to the allocator alignment
    #[inline]
    pub fn aligned_pool_size(&self) -> usize {
        align_down(self.pool_size, MIN_ALIGN)
    }

    /// The size of each semispace
    #[inline]
    pub fn half_size(&self) -> usize {
        align_down(self.pool_size / 2, MIN_ALIGN)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.half_size() < HEADER_SIZE {
            return Err(ConfigError::PoolTooSmall {
                pool_size: self.pool_size,
            });
        }
        if self.dict_min_capacity == 0 {
            return Err(ConfigError::ZeroDictCapacity);
        }
        Ok(())
    }
}
