//! Typed capability keys

use std::fmt;
use std::marker::PhantomData;

/// Identifies a service and the type it resolves to
///
/// Keys are usually declared as statics next to the code that provides the
/// service, e.g. `pub static FETCHER: ServiceKey<Arc<dyn Fetcher>>`.
pub struct ServiceKey<T> {
    name: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> ServiceKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _type: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> fmt::Debug for ServiceKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServiceKey").field(&self.name).finish()
    }
}
