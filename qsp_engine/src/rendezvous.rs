use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

/// Creates a single-use handoff: exactly one value travels from the `Reply`
/// side to the `Pending` side.
pub fn rendezvous<T>() -> (Reply<T>, Pending<T>) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (Reply { tx }, Pending { rx })
}

/// Producer half. Consumed by `send`; dropping it unanswered wakes the
/// waiter with "no answer".
#[derive(Debug)]
pub struct Reply<T> {
    tx: Sender<T>,
}

impl<T> Reply<T> {
    pub fn send(self, value: T) {
        if self.tx.send(value).is_err() {
            log::debug!("[qsp_engine::rendezvous] reply delivered after the waiter went away");
        }
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct Pending<T> {
    rx: Receiver<T>,
}

impl<T> Pending<T> {
    /// Blocks until the reply arrives. `None` means the reply side was
    /// dropped without answering.
    pub fn wait(self) -> Option<T> {
        match self.rx.recv() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("[qsp_engine::rendezvous] wait interrupted: reply dropped unanswered");
                None
            }
        }
    }

    /// Like `wait`, but gives up once `still_wanted` returns false. The
    /// condition is checked every `poll`.
    pub fn wait_while(self, mut still_wanted: impl FnMut() -> bool, poll: Duration) -> Option<T> {
        loop {
            match self.rx.recv_timeout(poll) {
                Ok(value) => return Some(value),
                Err(RecvTimeoutError::Disconnected) => {
                    log::warn!("[qsp_engine::rendezvous] wait interrupted: reply dropped unanswered");
                    return None;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !still_wanted() {
                        log::warn!("[qsp_engine::rendezvous] wait abandoned before a reply arrived");
                        return None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn delivers_exactly_the_sent_value() {
        let (reply, pending) = rendezvous::<String>();
        let sender = thread::spawn(move || reply.send("north".to_string()));
        assert_eq!(pending.wait().as_deref(), Some("north"));
        sender.join().expect("sender joins");
    }

    #[test]
    fn dropped_reply_yields_no_answer() {
        let (reply, pending) = rendezvous::<i32>();
        drop(reply);
        assert_eq!(pending.wait(), None);
    }

    #[test]
    fn abandoned_wait_yields_no_answer() {
        let (_reply, pending) = rendezvous::<i32>();
        let mut polls = 0;
        let answer = pending.wait_while(
            || {
                polls += 1;
                polls < 3
            },
            Duration::from_millis(1),
        );
        assert_eq!(answer, None);
        assert_eq!(polls, 3);
    }

    #[test]
    fn value_sent_while_polling_is_delivered() {
        let (reply, pending) = rendezvous::<u8>();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            reply.send(7);
        });
        assert_eq!(pending.wait_while(|| true, Duration::from_millis(2)), Some(7));
        sender.join().expect("sender joins");
    }
}
