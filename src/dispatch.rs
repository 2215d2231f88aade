use crate::Config;
use anyhow::Result;
use log::debug;
use rayon::{prelude::*, ThreadPoolBuilder};

/// Verbosity at which work runs on the calling thread
pub const SEQUENTIAL_VERBOSITY: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Sequential,
    Parallel { threads: usize },
}

impl Dispatch {
    pub fn from_config(config: &Config) -> Self {
        if config.verbose >= SEQUENTIAL_VERBOSITY {
            Dispatch::Sequential
        } else {
            Dispatch::Parallel {
                threads: config.thread,
            }
        }
    }
}

// --------------------------------------------------
/// Run `func` over every item and return the results in input order.
/// Parallel runs get their own pool, dropped when this returns.
pub fn dispatch<T, R, F>(items: Vec<T>, func: F, mode: Dispatch) -> Result<Vec<R>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Send + Sync,
{
    debug!("Dispatching {} items ({mode:?})", items.len());
    match mode {
        Dispatch::Sequential => Ok(items.into_iter().map(func).collect()),
        Dispatch::Parallel { threads } => {
            let pool = ThreadPoolBuilder::new().num_threads(threads).build()?;
            Ok(pool.install(|| items.into_par_iter().map(func).collect()))
        }
    }
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::{dispatch, Dispatch};
    use crate::Config;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_config() {
        let mut config = Config {
            thread: 6,
            ..Default::default()
        };
        assert_eq!(Dispatch::from_config(&config), Dispatch::Parallel { threads: 6 });

        config.verbose = 3;
        assert_eq!(Dispatch::from_config(&config), Dispatch::Sequential);
    }

    #[test]
    fn test_order_is_preserved() -> Result<()> {
        let items: Vec<u64> = (0..500).collect();
        let work = |n: u64| {
            // Uneven work so items finish out of order
            let spin = (500 - n) * 100;
            (0..spin).fold(n, |acc, i| acc.wrapping_add(i % 2)) - spin / 2
        };

        let sequential = dispatch(items.clone(), work, Dispatch::Sequential)?;
        let parallel = dispatch(items.clone(), work, Dispatch::Parallel { threads: 4 })?;
        assert_eq!(sequential, items);
        assert_eq!(parallel, sequential);
        Ok(())
    }

    #[test]
    fn test_empty() -> Result<()> {
        let res: Vec<u8> = dispatch(vec![], |n: u8| n, Dispatch::Parallel { threads: 2 })?;
        assert!(res.is_empty());
        Ok(())
    }
}
