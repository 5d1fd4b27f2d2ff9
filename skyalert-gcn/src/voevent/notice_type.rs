//! GCN packet types

use std::fmt;

/// Known GCN notice types, keyed by `Packet_Type` code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeType {
    SwiftBatGrbPosAck,
    FermiGbmFltPos,
    FermiGbmGndPos,
    FermiGbmFinPos,
    FermiGbmSubthresh,
    FermiGbmAlert,
    AmonIcecubeCoinc,
    AmonIcecubeHese,
    AmonIcecubeEhe,
    LvcPreliminary,
    LvcInitial,
    LvcUpdate,
    LvcRetraction,
    IcecubeAstrotrackGold,
    IcecubeAstrotrackBronze,
    IcecubeCascade,
    LvcEarlyWarning,
    /// A code outside the known set
    Other(i64),
    /// No `Packet_Type` parameter, or a non-integer one
    Unknown,
}

impl NoticeType {
    pub fn from_code(code: i64) -> Self {
        match code {
            61 => NoticeType::SwiftBatGrbPosAck,
            111 => NoticeType::FermiGbmFltPos,
            112 => NoticeType::FermiGbmGndPos,
            115 => NoticeType::FermiGbmFinPos,
            131 => NoticeType::FermiGbmSubthresh,
            110 => NoticeType::FermiGbmAlert,
            157 => NoticeType::AmonIcecubeCoinc,
            158 => NoticeType::AmonIcecubeHese,
            169 => NoticeType::AmonIcecubeEhe,
            150 => NoticeType::LvcPreliminary,
            151 => NoticeType::LvcInitial,
            152 => NoticeType::LvcUpdate,
            164 => NoticeType::LvcRetraction,
            163 => NoticeType::LvcEarlyWarning,
            173 => NoticeType::IcecubeAstrotrackGold,
            174 => NoticeType::IcecubeAstrotrackBronze,
            176 => NoticeType::IcecubeCascade,
            other => NoticeType::Other(other),
        }
    }

    /// Parse the `value` attribute of a `Packet_Type` parameter
    pub fn from_param(value: Option<&str>) -> Self {
        match value.map(str::trim).and_then(|v| v.parse::<i64>().ok()) {
            Some(code) => Self::from_code(code),
            None => NoticeType::Unknown,
        }
    }

    pub fn code(&self) -> Option<i64> {
        Some(match self {
            NoticeType::SwiftBatGrbPosAck => 61,
            NoticeType::FermiGbmFltPos => 111,
            NoticeType::FermiGbmGndPos => 112,
            NoticeType::FermiGbmFinPos => 115,
            NoticeType::FermiGbmSubthresh => 131,
            NoticeType::FermiGbmAlert => 110,
            NoticeType::AmonIcecubeCoinc => 157,
            NoticeType::AmonIcecubeHese => 158,
            NoticeType::AmonIcecubeEhe => 169,
            NoticeType::LvcPreliminary => 150,
            NoticeType::LvcInitial => 151,
            NoticeType::LvcUpdate => 152,
            NoticeType::LvcRetraction => 164,
            NoticeType::LvcEarlyWarning => 163,
            NoticeType::IcecubeAstrotrackGold => 173,
            NoticeType::IcecubeAstrotrackBronze => 174,
            NoticeType::IcecubeCascade => 176,
            NoticeType::Other(code) => *code,
            NoticeType::Unknown => return None,
        })
    }

    /// Canonical name persisted with each notice
    pub fn name(&self) -> String {
        let name = match self {
            NoticeType::SwiftBatGrbPosAck => "SWIFT_BAT_GRB_POS_ACK",
            NoticeType::FermiGbmFltPos => "FERMI_GBM_FLT_POS",
            NoticeType::FermiGbmGndPos => "FERMI_GBM_GND_POS",
            NoticeType::FermiGbmFinPos => "FERMI_GBM_FIN_POS",
            NoticeType::FermiGbmSubthresh => "FERMI_GBM_SUBTHRESH",
            NoticeType::FermiGbmAlert => "FERMI_GBM_ALERT",
            NoticeType::AmonIcecubeCoinc => "AMON_ICECUBE_COINC",
            NoticeType::AmonIcecubeHese => "AMON_ICECUBE_HESE",
            NoticeType::AmonIcecubeEhe => "AMON_ICECUBE_EHE",
            NoticeType::LvcPreliminary => "LVC_PRELIMINARY",
            NoticeType::LvcInitial => "LVC_INITIAL",
            NoticeType::LvcUpdate => "LVC_UPDATE",
            NoticeType::LvcRetraction => "LVC_RETRACTION",
            NoticeType::IcecubeAstrotrackGold => "ICECUBE_ASTROTRACK_GOLD",
            NoticeType::IcecubeAstrotrackBronze => "ICECUBE_ASTROTRACK_BRONZE",
            NoticeType::IcecubeCascade => "ICECUBE_CASCADE",
            NoticeType::LvcEarlyWarning => "LVC_EARLY_WARNING",
            NoticeType::Other(code) => return format!("OTHER_{}", code),
            NoticeType::Unknown => "UNKNOWN",
        };
        name.to_string()
    }

    /// Gravitational-wave alert types that carry the `GW` tag
    pub fn is_gravitational_wave(&self) -> bool {
        matches!(
            self,
            NoticeType::LvcPreliminary
                | NoticeType::LvcInitial
                | NoticeType::LvcUpdate
                | NoticeType::LvcRetraction
        )
    }
}

impl fmt::Display for NoticeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_round_trip() {
        for code in [61, 110, 111, 112, 115, 131, 150, 151, 152, 157, 158, 163, 164, 169, 173, 174, 176] {
            let ty = NoticeType::from_code(code);
            assert!(!matches!(ty, NoticeType::Other(_)), "code {} not recognised", code);
            assert_eq!(ty.code(), Some(code));
        }
    }

    #[test]
    fn test_unknown_and_other() {
        assert_eq!(NoticeType::from_param(None), NoticeType::Unknown);
        assert_eq!(NoticeType::from_param(Some("abc")), NoticeType::Unknown);
        assert_eq!(NoticeType::from_param(Some(" 999 ")), NoticeType::Other(999));
        assert_eq!(NoticeType::Other(999).name(), "OTHER_999");
        assert_eq!(NoticeType::from_code(157).name(), "AMON_ICECUBE_COINC");
    }

    #[test]
    fn test_gravitational_wave_set() {
        assert!(NoticeType::LvcPreliminary.is_gravitational_wave());
        assert!(NoticeType::LvcRetraction.is_gravitational_wave());
        assert!(!NoticeType::LvcEarlyWarning.is_gravitational_wave());
        assert!(!NoticeType::FermiGbmFinPos.is_gravitational_wave());
    }
}
