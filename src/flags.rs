use std::cmp::Ordering;

/// Outcome of the most recent CMP.
///
/// Only the low three bits are meaningful and at most one is ever set:
/// bit 0 = Equal, bit 1 = Greater, bit 2 = Less. A fresh engine has none set.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Flags(u8);

impl Flags {
    pub const EQUAL: u8 = 0b0000_0001;
    pub const GREATER: u8 = 0b0000_0010;
    pub const LESS: u8 = 0b0000_0100;

    pub fn new() -> Self {
        Self(0)
    }

    /// Flags describing `a` relative to `b`.
    pub fn compare(a: u8, b: u8) -> Self {
        match a.cmp(&b) {
            Ordering::Equal => Self(Self::EQUAL),
            Ordering::Greater => Self(Self::GREATER),
            Ordering::Less => Self(Self::LESS),
        }
    }

    pub fn equal(&self) -> bool {
        self.0 & Self::EQUAL != 0
    }

    pub fn greater(&self) -> bool {
        self.0 & Self::GREATER != 0
    }

    pub fn less(&self) -> bool {
        self.0 & Self::LESS != 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}
