// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-slot publish/subscribe channel inside one shared-memory segment.
//!
//! # Memory Layout
//!
//! ```text
//! Offset  Size   Field
//! 0       4      magic ("RTSH")
//! 4       4      version
//! 8       8      capacity (payload bytes)
//! 16      8      seq (AtomicU64) - seqlock, odd = write in progress
//! 24      8      len (AtomicU64) - payload length of the last publish
//! 32      4      notify (AtomicU32) - futex word, bumped on every publish
//! 36      28     reserved
//! 64      cap    payload
//! ```
//!
//! # Sequence Protocol
//!
//! Publish number `n` (1-based) leaves `seq == 2n`:
//! 1. Writer stores `seq = 2(n-1) + 1` (odd = writing)
//! 2. Writer copies the payload and its length
//! 3. Writer stores `seq = 2n` with Release (even = committed)
//!
//! A reader loads `seq` (Acquire), copies, then re-loads `seq`; any change or
//! an odd value means the copy may be torn and is retried.
//!
//! The slot holds only the latest element. A subscriber that polls less often
//! than the publisher publishes sees the gap in [`PollInfo::overwritten`].

use super::futex::{futex_wait, futex_wake_all};
use super::{Result, ShmError, ShmSegment};
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Size of the channel header preceding the payload area.
pub const HEADER_SIZE: usize = 64;

const MAGIC: u32 = u32::from_le_bytes(*b"RTSH");
const VERSION: u32 = 1;

/// Retries before a poll gives up with [`ShmError::Contended`].
const MAX_READ_RETRIES: usize = 64;

/// Futex wait slice when the timeout is too large to form a deadline.
const UNBOUNDED_WAIT_SLICE: Duration = Duration::from_secs(1);

#[repr(C)]
struct Header {
    magic: AtomicU32,
    version: AtomicU32,
    capacity: AtomicU64,
    seq: AtomicU64,
    len: AtomicU64,
    notify: AtomicU32,
    _reserved: [u32; 7],
}

const _: () = assert!(std::mem::size_of::<Header>() == HEADER_SIZE);

fn header(segment: &ShmSegment) -> Result<&Header> {
    let ptr = segment.as_ptr();
    if ptr.is_null() {
        return Err(ShmError::NotOpen);
    }
    if segment.size() < HEADER_SIZE {
        return Err(ShmError::BadHeader(format!(
            "segment {} smaller than header",
            segment.name()
        )));
    }
    // SAFETY:
    // - ptr is the start of a live mapping of at least HEADER_SIZE bytes (checked)
    // - mmap returns page-aligned memory, which satisfies Header's 8-byte alignment
    // - every Header field is an atomic (or unused padding), so shared access
    //   from several threads or processes is sound
    // - the returned reference borrows `segment`, so it cannot outlive the mapping
    Ok(unsafe { &*(ptr as *const Header) })
}

/// Outcome of a successful poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollInfo {
    /// Publish number of the element read (1-based).
    pub sequence: u64,
    /// Publishes overwritten since the previous successful poll.
    pub overwritten: u64,
    /// Payload length in bytes.
    pub len: usize,
}

// =======================================================================
// Publisher
// =======================================================================

/// Writing side of a channel. Owns the segment it created.
pub struct ShmPublisher {
    segment: ShmSegment,
    capacity: usize,
    published: u64,
}

impl ShmPublisher {
    /// Create (or take over) the named segment sized for `capacity` payload bytes.
    pub fn create(name: &str, capacity: usize) -> Result<Self> {
        let segment = ShmSegment::create(name, HEADER_SIZE + capacity)?;
        {
            let h = header(&segment)?;
            h.magic.store(0, Ordering::Relaxed);
            h.version.store(VERSION, Ordering::Relaxed);
            h.capacity.store(capacity as u64, Ordering::Relaxed);
            h.len.store(0, Ordering::Relaxed);
            h.seq.store(0, Ordering::Relaxed);
            // Release: subscribers that see the magic also see the fields above
            h.magic.store(MAGIC, Ordering::Release);
        }
        Ok(Self {
            segment,
            capacity,
            published: 0,
        })
    }

    /// Copy `payload` into the slot, commit it and wake waiting subscribers.
    ///
    /// Returns the publish number.
    ///
    /// # Errors
    ///
    /// [`ShmError::PayloadTooLarge`] if `payload` exceeds the slot capacity.
    pub fn publish(&mut self, payload: &[u8]) -> Result<u64> {
        if payload.len() > self.capacity {
            return Err(ShmError::PayloadTooLarge {
                size: payload.len(),
                capacity: self.capacity,
            });
        }
        let sequence = self.published + 1;

        {
            let h = header(&self.segment)?;
            h.seq.store(2 * self.published + 1, Ordering::Relaxed);
            // Keep the payload stores below from moving above the odd marker
            fence(Ordering::Release);
        }
        self.segment.write(HEADER_SIZE, payload)?;

        let h = header(&self.segment)?;
        h.len.store(payload.len() as u64, Ordering::Relaxed);
        h.seq.store(2 * sequence, Ordering::Release);
        h.notify.fetch_add(1, Ordering::Release);
        futex_wake_all(&h.notify);

        self.published = sequence;
        Ok(sequence)
    }

    /// Number of publishes so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Underlying segment name.
    pub fn name(&self) -> &str {
        self.segment.name()
    }

    /// Close the mapping and remove the segment name.
    pub fn close_and_unlink(mut self) -> Result<()> {
        self.segment.close()?;
        self.segment.unlink()
    }
}

impl std::fmt::Debug for ShmPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmPublisher")
            .field("name", &self.segment.name())
            .field("capacity", &self.capacity)
            .field("published", &self.published)
            .finish()
    }
}

// =======================================================================
// Subscriber
// =======================================================================

/// Reading side of a channel. May live in another process.
pub struct ShmSubscriber {
    segment: ShmSegment,
    capacity: usize,
    last_seen: u64,
}

impl ShmSubscriber {
    /// Attach to an existing channel by name.
    ///
    /// Only publishes made after this call are reported.
    ///
    /// # Errors
    ///
    /// [`ShmError::BadHeader`] when the name does not exist or does not hold a
    /// channel header.
    pub fn open(name: &str) -> Result<Self> {
        if !ShmSegment::exists(name) {
            return Err(ShmError::BadHeader(format!("segment {name} not found")));
        }

        let capacity = {
            let existing = ShmSegment::open(name, HEADER_SIZE)?;
            let h = header(&existing)?;
            if h.magic.load(Ordering::Acquire) != MAGIC {
                return Err(ShmError::BadHeader(format!("bad magic in {}", existing.name())));
            }
            let version = h.version.load(Ordering::Relaxed);
            if version != VERSION {
                return Err(ShmError::BadHeader(format!("unsupported version {version}")));
            }
            h.capacity.load(Ordering::Relaxed) as usize
        };

        let segment = ShmSegment::open(name, HEADER_SIZE + capacity)?;
        let last_seen = header(&segment)?.seq.load(Ordering::Acquire) / 2;
        log::debug!(
            "[SHM] Subscriber attached to {} (capacity {}, seq {})",
            segment.name(),
            capacity,
            last_seen
        );
        Ok(Self {
            segment,
            capacity,
            last_seen,
        })
    }

    /// Read the latest element into `out` if it was not seen yet.
    ///
    /// Returns `Ok(None)` when nothing new was published.
    ///
    /// # Errors
    ///
    /// [`ShmError::Contended`] if no consistent copy could be taken.
    pub fn poll_into(&mut self, out: &mut Vec<u8>) -> Result<Option<PollInfo>> {
        for _ in 0..MAX_READ_RETRIES {
            let (seq, len) = {
                let h = header(&self.segment)?;
                let seq = h.seq.load(Ordering::Acquire);
                if seq & 1 == 1 {
                    std::hint::spin_loop();
                    continue;
                }
                (seq, h.len.load(Ordering::Relaxed) as usize)
            };

            let sequence = seq / 2;
            if sequence == self.last_seen {
                return Ok(None);
            }
            if len > self.capacity {
                // Torn length from a concurrent publish
                continue;
            }

            out.resize(len, 0);
            self.segment.read(HEADER_SIZE, out)?;

            fence(Ordering::Acquire);
            if header(&self.segment)?.seq.load(Ordering::Relaxed) != seq {
                continue;
            }

            let overwritten = sequence.saturating_sub(self.last_seen + 1);
            self.last_seen = sequence;
            return Ok(Some(PollInfo {
                sequence,
                overwritten,
                len,
            }));
        }
        Err(ShmError::Contended)
    }

    /// Block until something new is published or `timeout` expires.
    ///
    /// Returns `true` if an unseen publish is available.
    pub fn wait(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let h = header(&self.segment)?;
            // Load the wake word before checking seq so a publish in between
            // makes futex_wait return immediately
            let ticket = h.notify.load(Ordering::Acquire);
            if h.seq.load(Ordering::Acquire) / 2 != self.last_seen {
                return Ok(true);
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    deadline - now
                }
                None => UNBOUNDED_WAIT_SLICE,
            };
            futex_wait(&h.notify, ticket, remaining);
        }
    }

    /// Payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish number of the last element read.
    pub fn last_sequence(&self) -> u64 {
        self.last_seen
    }

    /// Underlying segment name.
    pub fn name(&self) -> &str {
        self.segment.name()
    }
}

impl std::fmt::Debug for ShmSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmSubscriber")
            .field("name", &self.segment.name())
            .field("capacity", &self.capacity)
            .field("last_seen", &self.last_seen)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn unique_name() -> String {
        format!("/rtlink_chan_{}_{}", std::process::id(), fastrand::u64(..))
    }

    #[test]
    fn test_publish_poll() {
        let name = unique_name();
        let mut publisher = ShmPublisher::create(&name, 128).expect("create");
        let mut subscriber = ShmSubscriber::open(&name).expect("open");

        let mut buf = Vec::new();
        assert_eq!(subscriber.poll_into(&mut buf).expect("poll"), None);

        publisher.publish(b"hello").expect("publish");
        let info = subscriber.poll_into(&mut buf).expect("poll").expect("new data");
        assert_eq!(info, PollInfo { sequence: 1, overwritten: 0, len: 5 });
        assert_eq!(buf, b"hello");

        // Same publish is not reported twice
        assert_eq!(subscriber.poll_into(&mut buf).expect("poll"), None);

        publisher.close_and_unlink().expect("cleanup");
    }

    #[test]
    fn test_overwritten_count() {
        let name = unique_name();
        let mut publisher = ShmPublisher::create(&name, 16).expect("create");
        let mut subscriber = ShmSubscriber::open(&name).expect("open");

        for i in 0u8..4 {
            publisher.publish(&[i]).expect("publish");
        }
        let mut buf = Vec::new();
        let info = subscriber.poll_into(&mut buf).expect("poll").expect("new data");
        assert_eq!(info.sequence, 4);
        assert_eq!(info.overwritten, 3);
        assert_eq!(buf, vec![3]);

        publisher.close_and_unlink().expect("cleanup");
    }

    #[test]
    fn test_payload_too_large() {
        let name = unique_name();
        let mut publisher = ShmPublisher::create(&name, 4).expect("create");
        assert!(matches!(
            publisher.publish(&[0u8; 5]),
            Err(ShmError::PayloadTooLarge { size: 5, capacity: 4 })
        ));
        assert_eq!(publisher.published(), 0);
        publisher.close_and_unlink().expect("cleanup");
    }

    #[test]
    fn test_open_missing_or_foreign_segment() {
        assert!(matches!(
            ShmSubscriber::open(&unique_name()),
            Err(ShmError::BadHeader(_))
        ));

        let name = unique_name();
        let raw = ShmSegment::create(&name, 256).expect("create raw segment");
        assert!(matches!(ShmSubscriber::open(&name), Err(ShmError::BadHeader(_))));
        raw.unlink().expect("unlink");
    }

    #[test]
    fn test_wait_wakes_on_publish() {
        let name = unique_name();
        let mut publisher = ShmPublisher::create(&name, 32).expect("create");
        let subscriber = ShmSubscriber::open(&name).expect("open");

        assert!(!subscriber.wait(Duration::from_millis(10)).expect("wait"));

        let waiter = thread::spawn(move || {
            let ready = subscriber.wait(Duration::from_secs(2)).expect("wait");
            (ready, subscriber)
        });
        thread::sleep(Duration::from_millis(10));
        publisher.publish(b"ping").expect("publish");

        let (ready, mut subscriber) = waiter.join().expect("waiter thread");
        assert!(ready);
        let mut buf = Vec::new();
        assert!(subscriber.poll_into(&mut buf).expect("poll").is_some());
        assert_eq!(buf, b"ping");

        publisher.close_and_unlink().expect("cleanup");
    }

    #[test]
    fn test_wait_without_deadline() {
        let name = unique_name();
        let mut publisher = ShmPublisher::create(&name, 32).expect("create");
        let subscriber = ShmSubscriber::open(&name).expect("open");

        let waiter = thread::spawn(move || subscriber.wait(Duration::MAX).expect("wait"));
        thread::sleep(Duration::from_millis(10));
        publisher.publish(b"late").expect("publish");
        assert!(waiter.join().expect("waiter thread"));

        publisher.close_and_unlink().expect("cleanup");
    }
}
