use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};

/// 有界、丢弃最旧的单生产者单消费者帧队列
///
/// 基于 crossbeam 的有界通道。队列满时生产者从接收端挤掉最旧的一项再放入，
/// 两端都不会阻塞。容量按帧计，至少为 1。
#[derive(Debug)]
pub struct FrameQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
    evicted: AtomicU64,
}

impl<T> FrameQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            evicted: AtomicU64::new(0),
        }
    }

    /// 放入一项。返回 true 表示为此挤掉了最旧的一项。
    pub fn enqueue(&self, item: T) -> bool {
        let mut item = item;
        let mut evicted = false;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(back)) => {
                    item = back;
                    // 消费者可能刚好取走了一项，此时 try_recv 为空，直接重试
                    if self.rx.try_recv().is_ok() {
                        evicted = true;
                        self.evicted.fetch_add(1, Ordering::Relaxed);
                    }
                }
                // 两端都由本结构体持有，通道不会断开
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }

    /// 取出最旧的一项，空则返回 None
    pub fn dequeue(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 累计被挤掉的项数
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// 丢弃所有排队项，返回丢弃的数量
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fifo_within_capacity() {
        let q = FrameQueue::new(4);
        for i in 0..3 {
            assert!(!q.enqueue(i));
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.dequeue(), Some(0));
        assert_eq!(q.dequeue(), Some(1));
        assert_eq!(q.dequeue(), Some(2));
        assert_eq!(q.dequeue(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let q = FrameQueue::new(3);
        for i in 0..5 {
            q.enqueue(i);
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.evicted(), 2);
        let drained: Vec<_> = std::iter::from_fn(|| q.dequeue()).collect();
        assert_eq!(drained, vec![2, 3, 4]);
    }

    #[test]
    fn capacity_is_at_least_one() {
        let q = FrameQueue::new(0);
        assert_eq!(q.capacity(), 1);
        assert!(!q.enqueue("a"));
        assert!(q.enqueue("b"));
        assert_eq!(q.dequeue(), Some("b"));
    }

    #[test]
    fn clear_reports_discarded() {
        let q = FrameQueue::new(8);
        for i in 0..5 {
            q.enqueue(i);
        }
        assert_eq!(q.clear(), 5);
        assert!(q.is_empty());
    }

    #[test]
    fn concurrent_producer_consumer_keeps_order() {
        let q = Arc::new(FrameQueue::new(16));
        let producer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                for i in 0..10_000u32 {
                    q.enqueue(i);
                }
            })
        };

        let mut last = None;
        let mut received = 0usize;
        while !producer.is_finished() || !q.is_empty() {
            if let Some(v) = q.dequeue() {
                // 允许丢帧，但顺序不能乱
                if let Some(prev) = last {
                    assert!(v > prev);
                }
                last = Some(v);
                received += 1;
            }
            assert!(q.len() <= q.capacity());
        }
        producer.join().unwrap();
        assert_eq!(received as u64 + q.evicted(), 10_000);
    }
}
