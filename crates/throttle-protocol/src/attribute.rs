use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Attribute {
    Quota = 0,
    Ttl = 1,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Change {
    Patch = 0,
    Increase = 1,
    Decrease = 2,
}

#[derive(Debug, Error)]
pub enum UnknownField {
    #[error("unknown update attribute byte {0:#04x}")]
    Attribute(u8),
    #[error("unknown update change byte {0:#04x}")]
    Change(u8),
}

impl Attribute {
    pub const fn from_u8(byte: u8) -> Result<Self, UnknownField> {
        match byte {
            0 => Ok(Attribute::Quota),
            1 => Ok(Attribute::Ttl),
            other => Err(UnknownField::Attribute(other)),
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl Change {
    pub const fn from_u8(byte: u8) -> Result<Self, UnknownField> {
        match byte {
            0 => Ok(Change::Patch),
            1 => Ok(Change::Increase),
            2 => Ok(Change::Decrease),
            other => Err(UnknownField::Change(other)),
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}
