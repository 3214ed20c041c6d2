//! Hall code decoding and the six-step commutation table

/// Motor phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Phase {
    A = 0,
    B = 1,
    C = 2,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::A, Phase::B, Phase::C];
}

/// Raw logic levels of the three Hall inputs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HallLevels {
    pub a: bool,
    pub b: bool,
    pub c: bool,
}

impl HallLevels {
    pub const fn new(a: bool, b: bool, c: bool) -> Self {
        Self { a, b, c }
    }

    /// Compose the 3-bit code: sensor A is the MSB, sensor C the LSB
    pub const fn code(self) -> HallCode {
        HallCode(((self.a as u8) << 2) | ((self.b as u8) << 1) | (self.c as u8))
    }
}

impl From<HallCode> for HallLevels {
    fn from(code: HallCode) -> Self {
        let raw = code.as_u8();
        Self::new(raw & 0b100 != 0, raw & 0b010 != 0, raw & 0b001 != 0)
    }
}

/// 3-bit Hall sensor code (0-7)
///
/// With three sensors spaced 120° apart the rotor can only produce codes
/// 1-6. Codes 0 and 7 mean a shorted or disconnected sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HallCode(u8);

impl HallCode {
    /// Build a code from the low three bits of `raw`
    pub const fn new(raw: u8) -> Self {
        Self(raw & 0b111)
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0 && self.0 != 7
    }

    /// Phase-enable pattern for this code
    pub const fn pattern(self) -> PhasePattern {
        COMMUTATION_TABLE[self.0 as usize]
    }

    /// Position of this code in the forward rotation sequence (0-5)
    pub fn sector(self) -> Option<usize> {
        FORWARD_SEQUENCE.iter().position(|&c| c == self)
    }

    /// Code the sensors report after the rotor advances one sector
    pub fn next_forward(self) -> Option<Self> {
        self.sector()
            .map(|s| FORWARD_SEQUENCE[(s + 1) % FORWARD_SEQUENCE.len()])
    }
}

/// Which phases are driven with the commanded duty
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhasePattern {
    pub a: bool,
    pub b: bool,
    pub c: bool,
}

impl PhasePattern {
    /// No phase energized
    pub const OFF: Self = Self::new(false, false, false);

    pub const fn new(a: bool, b: bool, c: bool) -> Self {
        Self { a, b, c }
    }

    pub const fn is_off(self) -> bool {
        !(self.a || self.b || self.c)
    }

    pub const fn is_enabled(self, phase: Phase) -> bool {
        match phase {
            Phase::A => self.a,
            Phase::B => self.b,
            Phase::C => self.c,
        }
    }

    pub const fn enabled_count(self) -> u8 {
        self.a as u8 + self.b as u8 + self.c as u8
    }
}

/// Phase pattern for every Hall code, indexed by the code
pub const COMMUTATION_TABLE: [PhasePattern; 8] = [
    PhasePattern::OFF,                     // 0b000: invalid
    PhasePattern::new(true, false, false), // 0b001
    PhasePattern::new(false, true, false), // 0b010
    PhasePattern::new(true, true, false),  // 0b011
    PhasePattern::new(false, false, true), // 0b100
    PhasePattern::new(true, false, true),  // 0b101
    PhasePattern::new(false, true, true),  // 0b110
    PhasePattern::OFF,                     // 0b111: invalid
];

/// Valid codes in forward rotation order: 1 -> 3 -> 2 -> 6 -> 4 -> 5 -> 1
///
/// Neighbours differ by one Hall bit and one phase transition.
pub const FORWARD_SEQUENCE: [HallCode; 6] = [
    HallCode(1),
    HallCode(3),
    HallCode(2),
    HallCode(6),
    HallCode(4),
    HallCode(5),
];

/// Look up the phase pattern for a Hall code
pub const fn pattern_for(code: HallCode) -> PhasePattern {
    code.pattern()
}
