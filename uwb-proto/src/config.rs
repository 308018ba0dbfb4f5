//! DeviceConfig / PhoneConfig - the two fixed-layout records of the OoB exchange
//!
//! All integers are big-endian. Byte arrays are copied as-is.

use crate::ProtoError;

pub const DEVICE_CONFIG_LEN: usize = 18;
pub const PHONE_CONFIG_LEN: usize = 14;

fn check_len(record: &'static str, data: &[u8], expected: usize) -> Result<(), ProtoError> {
    if data.len() != expected {
        return Err(ProtoError::Format {
            record,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Capabilities advertised by the UWB device in reply to INITIALIZE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub spec_ver_major: u16,
    pub spec_ver_minor: u16,
    pub chip_id: [u8; 2],
    pub chip_fw_version: [u8; 2],
    pub mw_version: [u8; 3],
    /// Bitmask, bit n set = profile id n supported
    pub supported_profile_ids: u32,
    /// Bitmask, bit 0 = controlee, bit 1 = controller
    pub supported_ranging_roles: u8,
    pub device_mac_address: [u8; 2],
}

impl DeviceConfig {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(DEVICE_CONFIG_LEN);
        buf.extend_from_slice(&self.spec_ver_major.to_be_bytes());
        buf.extend_from_slice(&self.spec_ver_minor.to_be_bytes());
        buf.extend_from_slice(&self.chip_id);
        buf.extend_from_slice(&self.chip_fw_version);
        buf.extend_from_slice(&self.mw_version);
        buf.extend_from_slice(&self.supported_profile_ids.to_be_bytes());
        buf.push(self.supported_ranging_roles);
        buf.extend_from_slice(&self.device_mac_address);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtoError> {
        check_len("DeviceConfig", data, DEVICE_CONFIG_LEN)?;
        Ok(Self {
            spec_ver_major: u16::from_be_bytes([data[0], data[1]]),
            spec_ver_minor: u16::from_be_bytes([data[2], data[3]]),
            chip_id: [data[4], data[5]],
            chip_fw_version: [data[6], data[7]],
            mw_version: [data[8], data[9], data[10]],
            supported_profile_ids: u32::from_be_bytes([data[11], data[12], data[13], data[14]]),
            supported_ranging_roles: data[15],
            device_mac_address: [data[16], data[17]],
        })
    }
}

/// Session parameters chosen by the phone and sent back to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhoneConfig {
    pub spec_ver_major: u16,
    pub spec_ver_minor: u16,
    pub session_id: u32,
    pub preamble_id: u8,
    pub channel: u8,
    pub profile_id: u8,
    pub ranging_role: u8,
    pub phone_mac_address: [u8; 2],
}

impl PhoneConfig {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PHONE_CONFIG_LEN);
        buf.extend_from_slice(&self.spec_ver_major.to_be_bytes());
        buf.extend_from_slice(&self.spec_ver_minor.to_be_bytes());
        buf.extend_from_slice(&self.session_id.to_be_bytes());
        buf.push(self.preamble_id);
        buf.push(self.channel);
        buf.push(self.profile_id);
        buf.push(self.ranging_role);
        buf.extend_from_slice(&self.phone_mac_address);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtoError> {
        check_len("PhoneConfig", data, PHONE_CONFIG_LEN)?;
        Ok(Self {
            spec_ver_major: u16::from_be_bytes([data[0], data[1]]),
            spec_ver_minor: u16::from_be_bytes([data[2], data[3]]),
            // Full 32 bits, same width as the encoder
            session_id: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            preamble_id: data[8],
            channel: data[9],
            profile_id: data[10],
            ranging_role: data[11],
            phone_mac_address: [data[12], data[13]],
        })
    }
}
