//! One-shot setup bookkeeping for a single bridge.

/// Set of setup steps that have already been applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetupFlags(u8);

impl SetupFlags {
    pub const ADDR: Self = Self(1);
    pub const TERM: Self = Self(1 << 1);
    pub const LOGIN: Self = Self(1 << 2);
    pub const AUTH: Self = Self(1 << 3);

    #[must_use]
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// Mark `flag` as applied. Returns `false` if it already was.
    pub const fn mark(&mut self, flag: Self) -> bool {
        if self.contains(flag) {
            return false;
        }
        self.0 |= flag.0;
        true
    }
}

/// Values collected from setup messages.
#[derive(Debug, Clone)]
pub struct SetupState {
    flags: SetupFlags,
    target_address: Option<String>,
    terminal_type: String,
    username: String,
}

impl SetupState {
    #[must_use]
    pub fn new(default_term: impl Into<String>) -> Self {
        Self {
            flags: SetupFlags::default(),
            target_address: None,
            terminal_type: default_term.into(),
            username: String::new(),
        }
    }

    #[must_use]
    pub const fn has(&self, flag: SetupFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Record the dial target. Returns `false` if one was already set.
    pub fn set_address(&mut self, addr: String) -> bool {
        if !self.flags.mark(SetupFlags::ADDR) {
            return false;
        }
        self.target_address = Some(addr);
        true
    }

    /// Override the terminal type. Returns `false` if already overridden.
    pub fn set_terminal_type(&mut self, term: String) -> bool {
        if !self.flags.mark(SetupFlags::TERM) {
            return false;
        }
        self.terminal_type = term;
        true
    }

    /// Record the username. Returns `false` if one was already set.
    pub fn set_username(&mut self, username: String) -> bool {
        if !self.flags.mark(SetupFlags::LOGIN) {
            return false;
        }
        self.username = username;
        true
    }

    /// Mark authentication as done. Returns `false` if it already was.
    pub const fn mark_authenticated(&mut self) -> bool {
        self.flags.mark(SetupFlags::AUTH)
    }

    #[must_use]
    pub fn target_address(&self) -> Option<&str> {
        self.target_address.as_deref()
    }

    #[must_use]
    pub fn terminal_type(&self) -> &str {
        &self.terminal_type
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }
}
