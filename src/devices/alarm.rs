//! Randomised battery alarm generator.
//!
//! One alarm at a time: every trigger interval a kind is drawn uniformly from
//! [`AlarmKind::ALL`], stays active for the configured duration, then clears.

use std::fmt;
use std::str::FromStr;

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Serialize;

/// Alarm catalogue, in code order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    Overvoltage,
    Undervoltage,
    Overtemperature,
    Undertemperature,
    Overcurrent,
    CommunicationError,
    CellImbalance,
    IsolationFault,
    GroundFault,
    ThermalRunaway,
    LowSoc,
    HighSoc,
}

/// Which bank of four registers an alarm kind is reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmGroup {
    MajorProtection,
    MinorProtection,
    Alarm,
}

impl AlarmKind {
    /// Every kind, in code order.
    pub const ALL: [Self; 12] = [
        Self::Overvoltage,
        Self::Undervoltage,
        Self::Overtemperature,
        Self::Undertemperature,
        Self::Overcurrent,
        Self::CommunicationError,
        Self::CellImbalance,
        Self::IsolationFault,
        Self::GroundFault,
        Self::ThermalRunaway,
        Self::LowSoc,
        Self::HighSoc,
    ];

    /// Numeric alarm code, `0x2001` through `0x200C`.
    pub fn code(self) -> u16 {
        let index = Self::ALL.iter().position(|k| *k == self).unwrap_or(0);
        0x2001 + index as u16
    }

    /// Register bank and 0-based slot (`#1`..`#4`) for this kind.
    ///
    /// Each of the twelve registers belongs to exactly one kind.
    pub fn slot(self) -> (AlarmGroup, usize) {
        use AlarmGroup::{Alarm, MajorProtection, MinorProtection};
        match self {
            Self::Overvoltage => (MajorProtection, 0),
            Self::Undervoltage => (MajorProtection, 1),
            Self::Overtemperature => (MajorProtection, 2),
            Self::Overcurrent => (MajorProtection, 3),
            Self::Undertemperature => (MinorProtection, 0),
            Self::LowSoc => (MinorProtection, 1),
            Self::HighSoc => (MinorProtection, 2),
            Self::CommunicationError => (MinorProtection, 3),
            Self::CellImbalance => (Alarm, 0),
            Self::IsolationFault => (Alarm, 1),
            Self::GroundFault => (Alarm, 2),
            Self::ThermalRunaway => (Alarm, 3),
        }
    }

    /// Snake-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overvoltage => "overvoltage",
            Self::Undervoltage => "undervoltage",
            Self::Overtemperature => "overtemperature",
            Self::Undertemperature => "undertemperature",
            Self::Overcurrent => "overcurrent",
            Self::CommunicationError => "communication_error",
            Self::CellImbalance => "cell_imbalance",
            Self::IsolationFault => "isolation_fault",
            Self::GroundFault => "ground_fault",
            Self::ThermalRunaway => "thermal_runaway",
            Self::LowSoc => "low_soc",
            Self::HighSoc => "high_soc",
        }
    }
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlarmKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown alarm kind \"{s}\""))
    }
}

/// Twelve protection/alarm registers, index 0 holding `#1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProtectionFlags {
    pub major: [u16; 4],
    pub minor: [u16; 4],
    pub alarm: [u16; 4],
}

impl ProtectionFlags {
    /// Flags with only `kind`'s register set.
    pub fn for_kind(kind: AlarmKind) -> Self {
        let mut flags = Self::default();
        let (group, slot) = kind.slot();
        let bank = match group {
            AlarmGroup::MajorProtection => &mut flags.major,
            AlarmGroup::MinorProtection => &mut flags.minor,
            AlarmGroup::Alarm => &mut flags.alarm,
        };
        bank[slot] = 1;
        flags
    }

    /// Number of registers currently set.
    pub fn count_set(&self) -> usize {
        self.major
            .iter()
            .chain(&self.minor)
            .chain(&self.alarm)
            .filter(|&&v| v != 0)
            .count()
    }
}

/// Alarm generator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AlarmState {
    Idle,
    Active { kind: AlarmKind, started_ms: u64 },
}

impl AlarmState {
    /// Active alarm kind, if any.
    pub fn kind(&self) -> Option<AlarmKind> {
        match self {
            Self::Idle => None,
            Self::Active { kind, .. } => Some(*kind),
        }
    }

    /// Alarm code register value; 0 while idle.
    pub fn code(&self) -> u16 {
        self.kind().map_or(0, AlarmKind::code)
    }

    /// Protection/alarm register values; all zero while idle.
    pub fn flags(&self) -> ProtectionFlags {
        self.kind().map(ProtectionFlags::for_kind).unwrap_or_default()
    }
}

/// Change reported by [`AlarmMachine::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmTransition {
    Raised(AlarmKind),
    Cleared(AlarmKind),
}

/// Idle/Active state machine timed by a monotonic millisecond clock.
#[derive(Debug, Clone)]
pub struct AlarmMachine {
    state: AlarmState,
    last_trigger_ms: u64,
    trigger_interval_ms: u64,
    duration_ms: u64,
    enabled: bool,
    rng: StdRng,
}

impl AlarmMachine {
    /// Creates an idle machine whose first automatic alarm is due one full
    /// interval after `now_ms`.
    ///
    /// # Arguments
    ///
    /// * `trigger_interval_ms` - Minimum time between automatic alarms
    /// * `duration_ms` - How long an alarm stays active
    /// * `enabled` - Whether alarms are raised automatically
    /// * `now_ms` - Current monotonic time
    /// * `seed` - Random seed for the kind selection
    pub fn new(
        trigger_interval_ms: u64,
        duration_ms: u64,
        enabled: bool,
        now_ms: u64,
        seed: u64,
    ) -> Self {
        Self {
            state: AlarmState::Idle,
            last_trigger_ms: now_ms,
            trigger_interval_ms,
            duration_ms,
            enabled,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Current state.
    pub fn state(&self) -> AlarmState {
        self.state
    }

    /// Advances the machine to `now_ms`.
    ///
    /// Raises a random alarm when idle and at least one trigger interval has
    /// passed since the last trigger; clears an alarm that has been active
    /// for at least the configured duration.
    pub fn update(&mut self, now_ms: u64) -> Option<AlarmTransition> {
        if self.enabled
            && self.state == AlarmState::Idle
            && now_ms.saturating_sub(self.last_trigger_ms) >= self.trigger_interval_ms
        {
            let kind = AlarmKind::ALL[self.rng.random_range(0..AlarmKind::ALL.len())];
            self.trigger(kind, now_ms);
            return Some(AlarmTransition::Raised(kind));
        }

        if let AlarmState::Active { kind, started_ms } = self.state {
            if now_ms.saturating_sub(started_ms) >= self.duration_ms {
                self.state = AlarmState::Idle;
                return Some(AlarmTransition::Cleared(kind));
            }
        }
        None
    }

    /// Raises `kind` now, replacing any active alarm and restarting the
    /// trigger interval.
    pub fn trigger(&mut self, kind: AlarmKind, now_ms: u64) {
        self.state = AlarmState::Active {
            kind,
            started_ms: now_ms,
        };
        self.last_trigger_ms = now_ms;
    }

    /// Clears any active alarm without touching the trigger interval.
    pub fn clear(&mut self) -> Option<AlarmKind> {
        let kind = self.state.kind();
        self.state = AlarmState::Idle;
        kind
    }

    /// Returns to idle with the next automatic alarm one interval after `now_ms`.
    pub fn reset(&mut self, now_ms: u64) {
        self.state = AlarmState::Idle;
        self.last_trigger_ms = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> AlarmMachine {
        AlarmMachine::new(120_000, 10_000, true, 0, 42)
    }

    #[test]
    fn codes_follow_catalogue_order() {
        assert_eq!(AlarmKind::Overvoltage.code(), 0x2001);
        assert_eq!(AlarmKind::CommunicationError.code(), 0x2006);
        assert_eq!(AlarmKind::HighSoc.code(), 0x200C);
    }

    #[test]
    fn every_kind_sets_exactly_one_distinct_register() {
        let mut seen = std::collections::HashSet::new();
        for kind in AlarmKind::ALL {
            let flags = ProtectionFlags::for_kind(kind);
            assert_eq!(flags.count_set(), 1, "{kind} should set one register");
            assert!(seen.insert(kind.slot_key()), "{kind} shares a register");
        }
        assert_eq!(seen.len(), 12);
    }

    #[test]
    fn stays_idle_before_interval() {
        let mut m = machine();
        assert_eq!(m.update(0), None);
        assert_eq!(m.update(119_999), None);
        assert_eq!(m.state(), AlarmState::Idle);
        assert_eq!(m.state().code(), 0);
        assert_eq!(m.state().flags().count_set(), 0);
    }

    #[test]
    fn raises_after_interval_and_clears_after_duration() {
        let mut m = machine();
        let raised = m.update(120_000);
        let kind = match raised {
            Some(AlarmTransition::Raised(kind)) => kind,
            other => panic!("expected an alarm, got {other:?}"),
        };
        assert_eq!(m.state().kind(), Some(kind));
        assert_ne!(m.state().code(), 0);
        assert_eq!(m.state().flags().count_set(), 1);

        assert_eq!(m.update(129_999), None);
        assert_eq!(m.update(130_000), Some(AlarmTransition::Cleared(kind)));
        assert_eq!(m.state(), AlarmState::Idle);

        // next automatic alarm is one interval after the previous trigger
        assert_eq!(m.update(239_999), None);
        assert!(matches!(m.update(240_000), Some(AlarmTransition::Raised(_))));
    }

    #[test]
    fn manual_trigger_restarts_interval() {
        let mut m = machine();
        m.trigger(AlarmKind::GroundFault, 50_000);
        assert_eq!(m.state().code(), 0x2009);
        assert_eq!(m.state().flags().alarm, [0, 0, 1, 0]);
        assert_eq!(m.update(60_000), Some(AlarmTransition::Cleared(AlarmKind::GroundFault)));
        assert_eq!(m.update(120_000), None);
        assert!(matches!(m.update(170_000), Some(AlarmTransition::Raised(_))));
    }

    #[test]
    fn clear_and_disable() {
        let mut m = AlarmMachine::new(1_000, 10_000, false, 0, 1);
        assert_eq!(m.update(1_000_000), None);
        m.trigger(AlarmKind::LowSoc, 5);
        assert_eq!(m.clear(), Some(AlarmKind::LowSoc));
        assert_eq!(m.clear(), None);
    }

    #[test]
    fn parses_names() {
        for kind in AlarmKind::ALL {
            assert_eq!(kind.as_str().parse::<AlarmKind>(), Ok(kind));
        }
        assert!("meltdown".parse::<AlarmKind>().is_err());
    }

    impl AlarmKind {
        fn slot_key(self) -> (u8, usize) {
            let (group, slot) = self.slot();
            (group as u8, slot)
        }
    }
}
