//! Fixed-base receiver configuration
//!
//! Builds the command sequence that turns a receiver into an RTK reference
//! station: 1 Hz stationary navigation, RTCM 3 observation output, the UBX
//! records the station monitors, and NMEA reduced to what the user enabled.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::protocol::ubx::{cfg, class, mon, nav, nmea_std, rtcm, rxm, PortRates};
use super::protocol::UbxGenerator;
use super::scheduler::PollEntry;

/// NMEA sentences the receiver emits by default
const NMEA_DEFAULT_ON: [u8; 6] = [
    nmea_std::GGA,
    nmea_std::GLL,
    nmea_std::GSA,
    nmea_std::GSV,
    nmea_std::RMC,
    nmea_std::VTG,
];

/// NMEA sentences that stay off
const NMEA_DEFAULT_OFF: [u8; 7] = [
    nmea_std::GRS,
    nmea_std::GST,
    nmea_std::ZDA,
    nmea_std::GBS,
    nmea_std::DTM,
    nmea_std::GNS,
    nmea_std::VLW,
];

/// Output enable per host-facing port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSelection {
    pub uart1: bool,
    pub uart2: bool,
    pub usb: bool,
}

impl PortSelection {
    pub fn all() -> Self {
        Self {
            uart1: true,
            uart2: true,
            usb: true,
        }
    }

    /// `rate` on each selected port, 0 elsewhere
    pub fn rates(&self, rate: u8) -> PortRates {
        PortRates {
            uart1: if self.uart1 { rate } else { 0 },
            uart2: if self.uart2 { rate } else { 0 },
            usb: if self.usb { rate } else { 0 },
            ..PortRates::default()
        }
    }
}

/// Fixed-base options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseConfig {
    /// Emit MSM7 instead of MSM4 observations
    pub use_msm7: bool,
    /// Scheduler period once configured
    pub poll_interval_secs: u64,
    /// Ports that keep standard NMEA output at 1 Hz
    pub nmea: PortSelection,
    /// Ports that get UBX NAV-SAT
    pub nav_sat: PortSelection,
    /// RTCM 1005 rate per port, in navigation epochs
    pub rate_1005: PortRates,
    /// RTCM 1230 rate per port, in navigation epochs
    pub rate_1230: PortRates,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            use_msm7: false,
            poll_interval_secs: 30,
            nmea: PortSelection::default(),
            nav_sat: PortSelection::default(),
            rate_1005: PortSelection::all().rates(5),
            rate_1230: PortSelection::all().rates(5),
        }
    }
}

/// Host-facing ports only; I2C and SPI stay off
fn host_ports(rates: PortRates) -> PortRates {
    PortRates {
        i2c: 0,
        spi: 0,
        ..rates
    }
}

/// Ordered command frames for a fixed base
pub fn fixed_base_commands(config: &BaseConfig, gen: &UbxGenerator) -> Vec<Bytes> {
    let every = PortSelection::all();
    let mut frames = vec![gen.config_rate(1000), gen.config_nav_stationary(true)];

    for id in NMEA_DEFAULT_ON {
        frames.push(gen.config_msg_rate(class::NMEA_STD, id, config.nmea.rates(1)));
    }
    for id in NMEA_DEFAULT_OFF {
        frames.push(gen.turn_off(class::NMEA_STD, id));
    }

    frames.push(gen.config_msg_rate(class::NAV, nav::SVIN, every.rates(1)));
    frames.push(gen.config_msg_rate(class::NAV, nav::PVT, every.rates(1)));
    frames.push(gen.config_msg_rate(class::RTCM3, rtcm::TYPE1005, host_ports(config.rate_1005)));

    let (msm4, msm7) = if config.use_msm7 { (0, 1) } else { (1, 0) };
    for id in rtcm::MSM4 {
        frames.push(gen.config_msg_rate(class::RTCM3, id, every.rates(msm4)));
    }
    for id in rtcm::MSM7 {
        frames.push(gen.config_msg_rate(class::RTCM3, id, every.rates(msm7)));
    }

    frames.push(gen.config_msg_rate(class::RTCM3, rtcm::TYPE1230, host_ports(config.rate_1230)));
    frames.push(gen.config_msg_rate(class::NAV, nav::VELNED, every.rates(1)));
    frames.push(gen.config_msg_rate(class::RXM, rxm::RAWX, every.rates(1)));
    frames.push(gen.config_msg_rate(class::RXM, rxm::SFRBX, every.rates(2)));
    frames.push(gen.config_msg_rate(class::MON, mon::HW, every.rates(2)));
    frames.push(gen.config_msg_rate(class::NAV, nav::SAT, config.nav_sat.rates(1)));

    frames
}

/// Messages the scheduler keeps polling on a configured base
pub fn base_poll_entries() -> Vec<PollEntry> {
    vec![
        PollEntry::new(class::CFG, cfg::TMODE3),
        PollEntry::new(class::MON, mon::VER),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::ubx::{CfgMsg, PortId, UbxMessage};
    use crate::core::protocol::{FrameDetector, PayloadReader, UbxDetector};

    fn decode_msg(frame: &Bytes) -> CfgMsg {
        assert_eq!(frame[2], class::CFG);
        assert_eq!(frame[3], cfg::MSG);
        let mut reader = PayloadReader::new(&frame[6..frame.len() - 2]);
        CfgMsg::decode(&mut reader).unwrap()
    }

    fn find(frames: &[Bytes], msg_class: u8, msg_id: u8) -> CfgMsg {
        frames
            .iter()
            .filter(|f| f[3] == cfg::MSG)
            .map(decode_msg)
            .find(|m| m.msg_class == msg_class && m.msg_id == msg_id)
            .unwrap()
    }

    #[test]
    fn test_sequence_shape() {
        let frames = fixed_base_commands(&BaseConfig::default(), &UbxGenerator::new());
        assert_eq!(frames.len(), 2 + 6 + 7 + 2 + 1 + 8 + 1 + 5);
        assert_eq!(frames[0], UbxGenerator::new().config_rate(1000));
        for frame in &frames {
            assert_eq!(
                UbxDetector.try_extract(frame).frame_len(),
                frame.len(),
                "every command is a valid frame"
            );
        }
    }

    #[test]
    fn test_nmea_follows_selection() {
        let config = BaseConfig {
            nmea: PortSelection {
                usb: true,
                ..PortSelection::default()
            },
            ..BaseConfig::default()
        };
        let frames = fixed_base_commands(&config, &UbxGenerator::new());

        let gga = find(&frames, class::NMEA_STD, nmea_std::GGA);
        assert_eq!(gga.rates, [0, 0, 0, 1, 0]);
        let zda = find(&frames, class::NMEA_STD, nmea_std::ZDA);
        assert_eq!(zda.rates, [0; 5]);
    }

    #[test]
    fn test_msm_selection() {
        let gen = UbxGenerator::new();
        let msm4 = fixed_base_commands(&BaseConfig::default(), &gen);
        assert_eq!(find(&msm4, class::RTCM3, rtcm::TYPE1074).rate(PortId::Uart1), 1);
        assert_eq!(find(&msm4, class::RTCM3, rtcm::TYPE1077).rate(PortId::Uart1), 0);

        let config = BaseConfig {
            use_msm7: true,
            ..BaseConfig::default()
        };
        let msm7 = fixed_base_commands(&config, &gen);
        assert_eq!(find(&msm7, class::RTCM3, rtcm::TYPE1124).rate(PortId::Usb), 0);
        assert_eq!(find(&msm7, class::RTCM3, rtcm::TYPE1127).rate(PortId::Usb), 1);
    }

    #[test]
    fn test_rtcm_rates_exclude_i2c_spi() {
        let config = BaseConfig {
            rate_1005: PortRates::uniform(10),
            ..BaseConfig::default()
        };
        let frames = fixed_base_commands(&config, &UbxGenerator::new());
        let msg = find(&frames, class::RTCM3, rtcm::TYPE1005);
        assert_eq!(msg.rates, [0, 10, 10, 10, 0]);
        assert_eq!(find(&frames, class::RXM, rxm::SFRBX).rate(PortId::Uart2), 2);
    }

    #[test]
    fn test_poll_entries() {
        assert_eq!(
            base_poll_entries(),
            vec![PollEntry::new(0x06, 0x71), PollEntry::new(0x0A, 0x04)]
        );
    }
}
