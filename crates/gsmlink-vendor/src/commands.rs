//! AT command tables.
//!
//! [`standard_command`] spells every [`AtCommand`] the way 3GPP TS 27.007
//! and 27.005 do. Each vendor dialect overrides the handful of commands it
//! spells differently, and returns `None` for the optional bring-up stages
//! it has no equivalent for.
//!
//! All functions are pure: they produce strings without a line terminator.

use gsmlink_core::command::AtCommand;
use gsmlink_core::types::SmsMode;

/// Command-set family of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// SIMCOM SIM8xx/SIM9xx.
    Simcom,
    /// Quectel M-series and UC-series.
    Quectel,
}

/// Standard 27.007/27.005 spelling of `cmd`.
pub fn standard_command(cmd: &AtCommand) -> Option<String> {
    let s = match cmd {
        AtCommand::Reset => "ATZ".to_string(),
        AtCommand::Probe => "AT".to_string(),
        AtCommand::EchoOff => "ATE0".to_string(),
        AtCommand::VerboseErrors => "AT+CMEE=2".to_string(),
        AtCommand::ModelName => "AT+CGMM".to_string(),
        AtCommand::Manufacturer => "AT+CGMI".to_string(),
        AtCommand::Revision => "AT+CGMR".to_string(),
        AtCommand::SimSlotQuery | AtCommand::SimSlotSelect(_) | AtCommand::SimSlotConfirm => {
            return None;
        }
        AtCommand::Imei => "AT+CGSN".to_string(),
        AtCommand::SimStatus => "AT+CPIN?".to_string(),
        AtCommand::EnterPin(pin) => format!("AT+CPIN=\"{pin}\""),
        AtCommand::Imsi => "AT+CIMI".to_string(),
        AtCommand::CallerIdEnable => "AT+CLIP=1".to_string(),
        AtCommand::CallWaitingEnable => "AT+CCWA=1".to_string(),
        AtCommand::DtmfDetectEnable | AtCommand::SideTone(_) | AtCommand::NoiseCancel => {
            return None;
        }
        AtCommand::SpeakerVolume(level) => format!("AT+CLVL={level}"),
        AtCommand::MicVolume(_) => return None,
        AtCommand::DeleteAllSms => "AT+CMGD=1,4".to_string(),
        AtCommand::SmsFormat(SmsMode::Pdu) => "AT+CMGF=0".to_string(),
        AtCommand::SmsFormat(SmsMode::Text) => "AT+CMGF=1".to_string(),
        AtCommand::Charset => "AT+CSCS=\"GSM\"".to_string(),
        AtCommand::SmsIndication => "AT+CNMI=2,2,0,0,0".to_string(),
        AtCommand::RegistrationStatus => "AT+CREG?".to_string(),
        AtCommand::ServiceCenter => "AT+CSCA?".to_string(),
        AtCommand::OperatorName => "AT+COPS?".to_string(),
        AtCommand::OperatorList => "AT+COPS=?".to_string(),
        AtCommand::SignalQuality => "AT+CSQ".to_string(),
        AtCommand::CallStatus => "AT+CLCC".to_string(),
        AtCommand::Dial(number) => format!("ATD{number};"),
        AtCommand::Answer => "ATA".to_string(),
        AtCommand::Hangup => "ATH".to_string(),
        AtCommand::Dtmf(digit) => format!("AT+VTS={digit}"),
        AtCommand::SmsSubmitPdu(len) => format!("AT+CMGS={len}"),
        AtCommand::SmsSubmitText(dest) => format!("AT+CMGS=\"{dest}\""),
        AtCommand::SmsTextParams => "AT+CSMP=17,167,0,0".to_string(),
        AtCommand::ReadSms(index) => format!("AT+CMGR={index}"),
        AtCommand::DeleteSms(index) => format!("AT+CMGD={index}"),
        AtCommand::Ussd { code, dcs } => format!("AT+CUSD=1,\"{code}\",{dcs}"),
        AtCommand::ModuleReset => "AT+CFUN=1,1".to_string(),
        AtCommand::Raw(text) => text.clone(),
    };
    Some(s)
}

/// SIMCOM spelling of `cmd`.
pub fn simcom_command(cmd: &AtCommand) -> Option<String> {
    match cmd {
        AtCommand::DtmfDetectEnable => Some("AT+DDET=1".to_string()),
        AtCommand::SideTone(level) => Some(format!("AT+SIDET=0,{level}")),
        AtCommand::NoiseCancel => Some("AT+ECHO=0,96,253,16388,20488".to_string()),
        AtCommand::MicVolume(level) => Some(format!("AT+CMIC=0,{level}")),
        _ => standard_command(cmd),
    }
}

/// Quectel spelling of `cmd`.
///
/// Dual-SIM selection is spelled here; whether a model actually has a
/// second slot is decided by the model definition.
pub fn quectel_command(cmd: &AtCommand) -> Option<String> {
    match cmd {
        AtCommand::SimSlotQuery | AtCommand::SimSlotConfirm => Some("AT+QDSIM?".to_string()),
        AtCommand::SimSlotSelect(slot) => Some(format!("AT+QDSIM={slot}")),
        AtCommand::DtmfDetectEnable => Some("AT+QTONEDET=1".to_string()),
        AtCommand::SideTone(level) => Some(format!("AT+QSIDET={level}")),
        AtCommand::MicVolume(level) => Some(format!("AT+QMIC=0,{level}")),
        AtCommand::SmsIndication => Some("AT+CNMI=2,1,0,0,0".to_string()),
        AtCommand::Dtmf(digit) => Some(format!("AT+VTS=\"{digit}\"")),
        _ => standard_command(cmd),
    }
}

/// Spelling of `cmd` in `dialect`.
pub fn command_for(dialect: Dialect, cmd: &AtCommand) -> Option<String> {
    match dialect {
        Dialect::Simcom => simcom_command(cmd),
        Dialect::Quectel => quectel_command(cmd),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_bring_up_commands() {
        assert_eq!(standard_command(&AtCommand::Reset).as_deref(), Some("ATZ"));
        assert_eq!(
            standard_command(&AtCommand::VerboseErrors).as_deref(),
            Some("AT+CMEE=2")
        );
        assert_eq!(
            standard_command(&AtCommand::SmsFormat(SmsMode::Pdu)).as_deref(),
            Some("AT+CMGF=0")
        );
        assert_eq!(standard_command(&AtCommand::SimSlotQuery), None);
        assert_eq!(standard_command(&AtCommand::NoiseCancel), None);
    }

    #[test]
    fn standard_parameterised_commands() {
        assert_eq!(
            standard_command(&AtCommand::Dial("+441234".into())).as_deref(),
            Some("ATD+441234;")
        );
        assert_eq!(
            standard_command(&AtCommand::EnterPin("1234".into())).as_deref(),
            Some("AT+CPIN=\"1234\"")
        );
        assert_eq!(
            standard_command(&AtCommand::Ussd {
                code: "*100#".into(),
                dcs: 15
            })
            .as_deref(),
            Some("AT+CUSD=1,\"*100#\",15")
        );
        assert_eq!(
            standard_command(&AtCommand::SmsSubmitText("100".into())).as_deref(),
            Some("AT+CMGS=\"100\"")
        );
        assert_eq!(
            standard_command(&AtCommand::Raw("AT+CPAS".into())).as_deref(),
            Some("AT+CPAS")
        );
    }

    #[test]
    fn simcom_overrides() {
        assert_eq!(
            simcom_command(&AtCommand::DtmfDetectEnable).as_deref(),
            Some("AT+DDET=1")
        );
        assert_eq!(
            simcom_command(&AtCommand::MicVolume(10)).as_deref(),
            Some("AT+CMIC=0,10")
        );
        assert_eq!(simcom_command(&AtCommand::SimSlotSelect(1)), None);
        assert_eq!(simcom_command(&AtCommand::Probe).as_deref(), Some("AT"));
    }

    #[test]
    fn quectel_overrides() {
        assert_eq!(
            quectel_command(&AtCommand::SimSlotSelect(1)).as_deref(),
            Some("AT+QDSIM=1")
        );
        assert_eq!(
            quectel_command(&AtCommand::Dtmf('5')).as_deref(),
            Some("AT+VTS=\"5\"")
        );
        assert_eq!(quectel_command(&AtCommand::NoiseCancel), None);
        assert_eq!(
            command_for(Dialect::Quectel, &AtCommand::SmsIndication).as_deref(),
            Some("AT+CNMI=2,1,0,0,0")
        );
    }
}
