pub mod config;
pub mod defaults;
pub mod events;
pub mod host;
pub mod identity;
pub mod macros;
pub mod manager;
pub mod runtime;
pub mod store;

pub use wardrobe_app::logging;
pub use wardrobe_core::error;
pub use wardrobe_core::slots;
pub use wardrobe_core::text;
pub use wardrobe_storage::adapter;
pub use wardrobe_storage::data_manager;
pub use wardrobe_storage::document;
pub use wardrobe_storage::migration;

#[cfg(test)]
pub mod test_support {
    use std::sync::{Mutex, MutexGuard, OnceLock};

    pub fn env_lock() -> MutexGuard<'static, ()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }
}
