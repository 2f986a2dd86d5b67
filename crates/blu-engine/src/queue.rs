//! Bounded stage queues.

use crossbeam_channel::{bounded, Receiver, Sender};

/// Receive end of a single-consumer stage queue.
///
/// Not `Clone`: the stage that takes it is the only consumer the queue will
/// ever have. Stages that must stay single-instance (Saver, Copier,
/// Verifier, Repairer) are constructed from one of these.
#[derive(Debug)]
pub struct StageInput<T> {
    rx: Receiver<T>,
}

impl<T> StageInput<T> {
    /// Blocking iterator over items in enqueue order.
    pub fn iter(&self) -> crossbeam_channel::Iter<'_, T> {
        self.rx.iter()
    }
}

impl<T> IntoIterator for StageInput<T> {
    type Item = T;
    type IntoIter = crossbeam_channel::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rx.into_iter()
    }
}

/// Create a bounded queue whose receive end can feed exactly one stage.
pub fn stage_queue<T>(capacity: usize) -> (Sender<T>, StageInput<T>) {
    let (tx, rx) = bounded(capacity.max(1));
    (tx, StageInput { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_items_arrive_in_order_then_close() {
        let (tx, input) = stage_queue(2);
        let producer = thread::spawn(move || {
            for i in 0..10 {
                tx.send(i).unwrap();
            }
        });
        let got: Vec<i32> = input.into_iter().collect();
        producer.join().unwrap();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_iter_ends_after_close() {
        let (tx, input) = stage_queue::<u8>(0);
        drop(tx);
        assert_eq!(input.iter().next(), None);
    }
}
