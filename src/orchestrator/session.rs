/// Session flags owned by the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Session {
    started: bool,
    awaiting_result: bool,
    ended: bool,
}

impl Session {
    pub fn started(&self) -> bool {
        self.started
    }

    pub fn awaiting_result(&self) -> bool {
        self.awaiting_result
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    /// The command input is usable only between turns of a live session.
    pub fn input_enabled(&self) -> bool {
        self.started && !self.awaiting_result && !self.ended
    }

    pub fn can_start(&self) -> bool {
        !self.started && !self.awaiting_result && !self.ended
    }

    pub fn mark_started(&mut self) {
        self.started = true;
    }

    pub fn begin_request(&mut self) {
        self.awaiting_result = true;
    }

    pub fn finish_request(&mut self) {
        self.awaiting_result = false;
    }

    /// Terminal transition. Returns false when the session had already ended.
    pub fn end(&mut self) -> bool {
        if self.ended {
            return false;
        }
        self.started = false;
        self.awaiting_result = false;
        self.ended = true;
        true
    }
}
