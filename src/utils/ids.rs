use std::collections::HashSet;

/// Set of currently handed out ids, recycled once released.
#[derive(Debug, Default)]
pub(crate) struct IdPool {
    live: HashSet<usize>,
    counter: usize,
}

impl IdPool {
    pub(crate) fn next(&mut self) -> usize {
        if self.live.len() == usize::MAX {
            panic!("Out of ids");
        }

        while !self.live.insert(self.counter) {
            self.counter = self.counter.wrapping_add(1);
        }

        let new_id = self.counter;
        self.counter = self.counter.wrapping_add(1);
        new_id
    }

    pub(crate) fn remove(&mut self, id: usize) -> bool {
        self.live.remove(&id)
    }
}

/// Generates a module handing out process-wide unique ids.
///
/// A live object never shares its id with another live object, as long as
/// every id obtained through `next()` is given back through `remove()`.
macro_rules! id_gen {
    ($mod_name:ident) => {
        mod $mod_name {
            use once_cell::sync::Lazy;
            use std::sync::Mutex;

            use $crate::utils::ids::IdPool;

            static ID_DATA: Lazy<Mutex<IdPool>> = Lazy::new(|| Mutex::new(IdPool::default()));

            pub(crate) fn next() -> usize {
                ID_DATA.lock().unwrap().next()
            }

            pub(crate) fn remove(id: usize) -> bool {
                ID_DATA.lock().unwrap().remove(id)
            }
        }
    };
}

pub(crate) use id_gen;

#[cfg(test)]
mod tests {
    use super::IdPool;

    super::id_gen!(test_ids);

    #[test]
    fn live_ids_are_unique() {
        let a = test_ids::next();
        let b = test_ids::next();
        assert_ne!(a, b);
        assert!(test_ids::remove(a));
        assert!(!test_ids::remove(a));
        let c = test_ids::next();
        assert_ne!(b, c);
        assert!(test_ids::remove(b));
        assert!(test_ids::remove(c));
    }

    #[test]
    fn pool_skips_live_ids_on_wrap() {
        let mut pool = IdPool {
            live: Default::default(),
            counter: usize::MAX,
        };
        assert_eq!(pool.next(), usize::MAX);
        assert_eq!(pool.next(), 0);
        pool.counter = usize::MAX;
        assert_eq!(pool.next(), 1);
    }
}
