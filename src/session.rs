//! Rewriter session state machine
//!
//! A session owns one engine and moves through `Healthy -> {Broken, Closed}`.
//! The engine is dropped on the first terminal transition and never touched
//! again; every later call fails with [`Error::SessionEnded`].

use std::fmt;

use crate::error::{Error, Failure};

/// Streaming engine driven by a session.
pub trait Engine {
    fn write(&mut self, chunk: &[u8]) -> Result<(), Failure>;

    /// Flush and finalize. Consumes the engine.
    fn end(self) -> Result<(), Failure>;
}

/// Observable session state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Healthy,
    Broken,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Healthy => "healthy",
            SessionState::Broken => "broken",
            SessionState::Closed => "closed",
        })
    }
}

enum Stage<E> {
    Healthy(E),
    Broken,
    Closed,
}

/// One streaming rewrite from construction to close or break
pub struct Session<E: Engine> {
    stage: Stage<E>,
}

impl<E: Engine> Session<E> {
    pub fn new(engine: E) -> Self {
        Self {
            stage: Stage::Healthy(engine),
        }
    }

    pub fn state(&self) -> SessionState {
        match self.stage {
            Stage::Healthy(_) => SessionState::Healthy,
            Stage::Broken => SessionState::Broken,
            Stage::Closed => SessionState::Closed,
        }
    }

    /// Feed `chunk` to the engine. Any failure breaks the session.
    pub fn write(&mut self, chunk: &[u8]) -> Result<(), Failure> {
        let Stage::Healthy(engine) = &mut self.stage else {
            return Err(Error::SessionEnded.into());
        };
        let outcome = engine.write(chunk);
        if let Err(failure) = &outcome {
            log::debug!("session: write failed, breaking: {failure}");
            // Dropping the previous stage frees the engine.
            self.stage = Stage::Broken;
        }
        outcome
    }

    /// Finalize the session. The engine is released whatever the outcome.
    pub fn end(&mut self) -> Result<(), Failure> {
        let engine = match std::mem::replace(&mut self.stage, Stage::Broken) {
            Stage::Healthy(engine) => engine,
            ended => {
                self.stage = ended;
                return Err(Error::SessionEnded.into());
            }
        };
        match engine.end() {
            Ok(()) => {
                log::debug!("session: closed");
                self.stage = Stage::Closed;
                Ok(())
            }
            Err(failure) => {
                log::debug!("session: end failed, breaking: {failure}");
                Err(failure)
            }
        }
    }

    /// Release the engine without finalizing. No-op once terminal.
    pub fn dispose(&mut self) {
        if let Stage::Healthy(_) = self.stage {
            log::debug!("session: disposed while healthy");
            self.stage = Stage::Broken;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    /// Engine that fails on demand and counts how often it is freed.
    struct MockEngine {
        calls: Rc<Cell<u32>>,
        frees: Rc<Cell<u32>>,
        fail_write_at: Option<u32>,
        fail_end: bool,
    }

    impl Drop for MockEngine {
        fn drop(&mut self) {
            self.frees.set(self.frees.get() + 1);
        }
    }

    impl Engine for MockEngine {
        fn write(&mut self, _: &[u8]) -> Result<(), Failure> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_write_at == Some(self.calls.get()) {
                return Err(Error::Engine("parsing ambiguity".into()).into());
            }
            Ok(())
        }

        fn end(self) -> Result<(), Failure> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_end {
                return Err(Error::Engine("end failed".into()).into());
            }
            Ok(())
        }
    }

    struct Counters {
        calls: Rc<Cell<u32>>,
        frees: Rc<Cell<u32>>,
    }

    fn mock(fail_write_at: Option<u32>, fail_end: bool) -> (Session<MockEngine>, Counters) {
        let counters = Counters {
            calls: Rc::default(),
            frees: Rc::default(),
        };
        let engine = MockEngine {
            calls: Rc::clone(&counters.calls),
            frees: Rc::clone(&counters.frees),
            fail_write_at,
            fail_end,
        };
        (Session::new(engine), counters)
    }

    fn is_session_ended(outcome: Result<(), Failure>) -> bool {
        matches!(outcome, Err(Failure::Bridge(Error::SessionEnded)))
    }

    #[test]
    fn test_close_frees_once() {
        let (mut session, counters) = mock(None, false);
        session.write(b"<p>").unwrap();
        session.write(b"</p>").unwrap();
        assert_eq!(session.state(), SessionState::Healthy);
        assert_eq!(counters.frees.get(), 0);

        session.end().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(counters.frees.get(), 1);

        assert!(is_session_ended(session.write(b"more")));
        assert!(is_session_ended(session.end()));
        drop(session);
        assert_eq!(counters.frees.get(), 1);
        assert_eq!(counters.calls.get(), 3);
    }

    #[test]
    fn test_write_failure_breaks() {
        let (mut session, counters) = mock(Some(2), false);
        session.write(b"a").unwrap();
        assert!(matches!(
            session.write(b"b"),
            Err(Failure::Bridge(Error::Engine(_)))
        ));
        assert_eq!(session.state(), SessionState::Broken);
        assert_eq!(counters.frees.get(), 1);

        assert!(is_session_ended(session.write(b"c")));
        assert!(is_session_ended(session.end()));
        assert_eq!(counters.calls.get(), 2);
        drop(session);
        assert_eq!(counters.frees.get(), 1);
    }

    #[test]
    fn test_end_failure_breaks() {
        let (mut session, counters) = mock(None, true);
        assert!(session.end().is_err());
        assert_eq!(session.state(), SessionState::Broken);
        assert_eq!(counters.frees.get(), 1);
        assert!(is_session_ended(session.end()));
    }

    #[test]
    fn test_dispose() {
        let (mut session, counters) = mock(None, false);
        session.dispose();
        session.dispose();
        assert_eq!(session.state(), SessionState::Broken);
        assert_eq!(counters.frees.get(), 1);
        assert!(is_session_ended(session.write(b"x")));
        assert_eq!(counters.calls.get(), 0);
    }

    #[test]
    fn test_drop_while_healthy_frees() {
        let (session, counters) = mock(None, false);
        drop(session);
        assert_eq!(counters.frees.get(), 1);
    }
}
