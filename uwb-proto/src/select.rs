//! Ranging role and profile selection from the device's capability bitmasks

/// Ranging role taken by the phone. The discriminant is the on-wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Role {
    Unsupported = 0x00,
    Controlee = 0x01,
    Controller = 0x02,
}

impl Role {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_supported(self) -> bool {
        self != Role::Unsupported
    }
}

/// UWB configuration profile. The discriminant is the profile id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProfileId {
    Unsupported = 0,
    /// Unicast, distance only, double-sided two-way ranging
    UnicastDsTwr = 1,
}

impl ProfileId {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_supported(self) -> bool {
        self != ProfileId::Unsupported
    }
}

/// Bit 0 (controlee) wins over bit 1 (controller)
pub fn select_ranging_role(mask: u8) -> Role {
    if mask & 0b01 != 0 {
        Role::Controlee
    } else if mask & 0b10 != 0 {
        Role::Controller
    } else {
        Role::Unsupported
    }
}

/// Profiles we can run, in priority order. First one the device advertises wins.
const PROFILE_PRIORITY: [ProfileId; 1] = [ProfileId::UnicastDsTwr];

pub fn select_profile_id(mask: u32) -> ProfileId {
    PROFILE_PRIORITY
        .into_iter()
        .find(|profile| mask & (1u32 << profile.as_u8()) != 0)
        .unwrap_or(ProfileId::Unsupported)
}
