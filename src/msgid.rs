//! Per-thread message identifier generation.
//!
//! Grounded on `msg_id_util.cc`'s `MsgIDUtil::GenMsgID`: a 20-digit
//! decimal string seeded from `/dev/urandom`, then incremented lexically
//! (treating the string as a base-10 number) until every digit reaches
//! `9`, at which point a fresh block is drawn.

use std::cell::RefCell;
use std::fs::File;
use std::io::Read;
use std::sync::{Mutex, OnceLock};

const MSG_ID_LENGTH: usize = 20;

fn random_source() -> &'static Mutex<File> {
    static SOURCE: OnceLock<Mutex<File>> = OnceLock::new();
    SOURCE.get_or_init(|| {
        Mutex::new(File::open("/dev/urandom").expect("/dev/urandom must be readable"))
    })
}

thread_local! {
    static CURRENT: RefCell<String> = const { RefCell::new(String::new()) };
    static MAX: RefCell<String> = const { RefCell::new(String::new()) };
}

/// Generates the next message identifier for the calling thread.
///
/// Identifiers are unique per thread and monotonically increasing within
/// a random block, but are not globally ordered across threads — callers
/// needing cross-thread uniqueness must combine this with other context
/// (e.g. a connection or worker identifier), matching the original's
/// scope (spec.md §4.8).
pub fn gen_msg_id() -> String {
    let exhausted = CURRENT.with(|c| MAX.with(|m| c.borrow().is_empty() || *c.borrow() == *m.borrow()));

    if exhausted {
        let mut raw = [0u8; MSG_ID_LENGTH];
        random_source()
            .lock()
            .unwrap()
            .read_exact(&mut raw)
            .expect("failed to read from /dev/urandom");

        let digits: String = raw.iter().map(|b| (b % 10) + b'0').map(|c| c as char).collect();
        CURRENT.with(|c| *c.borrow_mut() = digits);
        MAX.with(|m| *m.borrow_mut() = "9".repeat(MSG_ID_LENGTH));
    } else {
        CURRENT.with(|c| {
            let mut bytes = c.borrow().clone().into_bytes();
            let mut i = bytes.len();
            while i > 0 && bytes[i - 1] == b'9' {
                i -= 1;
            }
            if i > 0 {
                bytes[i - 1] += 1;
                for b in &mut bytes[i..] {
                    *b = b'0';
                }
            }
            *c.borrow_mut() = String::from_utf8(bytes).unwrap();
        });
    }

    CURRENT.with(|c| c.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_fixed_length_ids() {
        let id = gen_msg_id();
        assert_eq!(id.len(), MSG_ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn consecutive_ids_on_same_thread_differ() {
        let a = gen_msg_id();
        let b = gen_msg_id();
        assert_ne!(a, b);
    }

    #[test]
    fn increment_carries_over_trailing_nines() {
        CURRENT.with(|c| *c.borrow_mut() = "00000000000000000019".chars().take(MSG_ID_LENGTH).collect());
        MAX.with(|m| *m.borrow_mut() = "9".repeat(MSG_ID_LENGTH));
        let next = gen_msg_id();
        assert_eq!(next, "00000000000000000020");
    }
}
