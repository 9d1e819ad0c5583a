use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::core::item::{ItemReader, ItemReaderResult};

/// Reads items from an in-memory list, in order.
///
/// The cursor sits behind a mutex, so one reader can be shared by the
/// threads of a partitioned step.
///
/// ```
/// use spring_batch_engine::{core::item::ItemReader, item::list::ListItemReader};
///
/// let reader = ListItemReader::new(vec!["kim", "lee"]);
///
/// assert_eq!(reader.read().unwrap(), Some("kim"));
/// assert_eq!(reader.read().unwrap(), Some("lee"));
/// assert_eq!(reader.read().unwrap(), None);
/// ```
#[derive(Debug)]
pub struct ListItemReader<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> ListItemReader<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: Mutex::new(items.into()),
        }
    }

    /// Items not read yet.
    pub fn remaining(&self) -> usize {
        self.items.lock().len()
    }
}

impl<T> FromIterator<T> for ListItemReader<T> {
    fn from_iter<It: IntoIterator<Item = T>>(iter: It) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<T> ItemReader<T> for ListItemReader<T> {
    fn read(&self) -> ItemReaderResult<T> {
        Ok(self.items.lock().pop_front())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn concurrent_reads_should_hand_out_each_item_once() {
        let reader = Arc::new((0..1000).collect::<ListItemReader<u32>>());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reader = Arc::clone(&reader);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(item) = reader.read().unwrap() {
                        seen.push(item);
                    }
                    seen
                })
            })
            .collect();

        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        all.sort_unstable();

        assert_eq!(all, (0..1000).collect::<Vec<_>>());
        assert_eq!(reader.remaining(), 0);
    }
}
