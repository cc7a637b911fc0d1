use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
    /// Closing, and a new capture will be opened once the source is closed.
    StoppingForRestart,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Stop,
    Restart,
    SourceClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    None,
    OpenSource,
    CloseSource,
    Ignore(&'static str),
}

impl SessionState {
    pub fn transition(&self, command: SessionCommand) -> (SessionState, SessionAction) {
        use SessionAction as A;
        use SessionCommand as C;
        use SessionState as S;

        match (self, command) {
            (S::Idle, C::Start | C::Restart) => (S::Capturing, A::OpenSource),
            (S::Idle, C::Stop) => (S::Idle, A::Ignore("already stopped")),
            (S::Idle, C::SourceClosed) => (S::Idle, A::None),

            (S::Capturing, C::Start) => (S::Capturing, A::Ignore("already capturing")),
            (S::Capturing, C::Stop) => (S::Stopping, A::CloseSource),
            (S::Capturing, C::Restart) => (S::StoppingForRestart, A::CloseSource),
            // The source went away on its own.
            (S::Capturing, C::SourceClosed) => (S::Idle, A::None),

            (S::Stopping, C::Start | C::Restart) => (S::StoppingForRestart, A::None),
            (S::Stopping, C::Stop) => (S::Stopping, A::Ignore("already stopping")),
            (S::Stopping, C::SourceClosed) => (S::Idle, A::None),

            (S::StoppingForRestart, C::Start | C::Restart) => {
                (S::StoppingForRestart, A::Ignore("restart already pending"))
            }
            (S::StoppingForRestart, C::Stop) => (S::Stopping, A::None),
            (S::StoppingForRestart, C::SourceClosed) => (S::Capturing, A::OpenSource),
        }
    }

    pub fn is_stopping(&self) -> bool {
        matches!(self, SessionState::Stopping | SessionState::StoppingForRestart)
    }
}

/// Owned by the capture worker; applies commands and remembers the state.
#[derive(Debug)]
pub struct CaptureSession {
    state: SessionState,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_stopping(&self) -> bool {
        self.state.is_stopping()
    }

    pub fn apply(&mut self, command: SessionCommand) -> SessionAction {
        let (next, action) = self.state.transition(command);
        if next != self.state {
            debug!("Session {:?} --{:?}--> {:?}", self.state, command, next);
        }
        self.state = next;
        action
    }

    /// A requested open failed; nothing is running.
    pub fn open_failed(&mut self) {
        debug!("Session {:?} --open failed--> Idle", self.state);
        self.state = SessionState::Idle;
    }
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}
