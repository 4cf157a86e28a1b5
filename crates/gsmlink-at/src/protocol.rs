//! AT response classification and information-line parsers.
//!
//! Every framed line is first run through [`classify`], which separates
//! final result codes (`OK`, `ERROR`, `+CME ERROR: ..`, `NO CARRIER`, ...)
//! from information lines (`+PREFIX: data`) and plain text (IMEI, model
//! strings, echoes). The typed parsers below then pick apart the data of
//! the information lines the engine cares about.
//!
//! # Response format
//!
//! ```text
//! +CREG: 0,1               solicited info line
//! +CREG: 1                 unsolicited result code, same prefix
//! +CME ERROR: SIM failure  verbose error (AT+CMEE=2)
//! +CME ERROR: 13           numeric error (AT+CMEE=1)
//! ```
//!
//! Fields are comma separated; string fields are double-quoted and may
//! themselves contain commas.

use gsmlink_core::types::{
    CallerId, Coverage, Operator, OperatorStatus, RegistrationStatus, SimState,
};

/// Classification of one framed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Error,
    /// `+CME ERROR:` with the numeric code when one could be determined.
    CmeError { code: Option<u16>, text: String },
    /// `+CMS ERROR:` (SMS service errors).
    CmsError { code: Option<u16>, text: String },
    NoCarrier,
    Busy,
    NoAnswer,
    NoDialtone,
    Connect,
    /// `RING` or `+CRING: <type>`.
    Ring,
    /// `+PREFIX: data` (or `^PREFIX: data`).
    Info { prefix: String, data: String },
    /// Any other line.
    Text(String),
}

impl Response {
    /// Whether this line ends a command/response exchange.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Response::Ok
                | Response::Error
                | Response::CmeError { .. }
                | Response::CmsError { .. }
                | Response::NoCarrier
                | Response::Busy
                | Response::NoAnswer
                | Response::NoDialtone
                | Response::Connect
        )
    }

    /// Whether this is an error result of any kind.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Response::Error | Response::CmeError { .. } | Response::CmsError { .. }
        )
    }

    /// The CME error code, if this is a CME error carrying one.
    pub fn cme_code(&self) -> Option<u16> {
        match self {
            Response::CmeError { code, .. } => *code,
            _ => None,
        }
    }
}

/// Classify one framed line.
pub fn classify(line: &str) -> Response {
    let line = line.trim();
    match line {
        "OK" => return Response::Ok,
        "ERROR" => return Response::Error,
        "NO CARRIER" => return Response::NoCarrier,
        "BUSY" => return Response::Busy,
        "NO ANSWER" => return Response::NoAnswer,
        "NO DIALTONE" | "NO DIAL TONE" => return Response::NoDialtone,
        "RING" => return Response::Ring,
        _ => {}
    }
    if line == "CONNECT" || line.starts_with("CONNECT ") {
        return Response::Connect;
    }
    if let Some(text) = info_data(line, "+CME ERROR") {
        return Response::CmeError {
            code: cme_code(text),
            text: text.to_string(),
        };
    }
    if let Some(text) = info_data(line, "+CMS ERROR") {
        return Response::CmsError {
            code: text.trim().parse().ok(),
            text: text.to_string(),
        };
    }
    if line.starts_with("+CRING") {
        return Response::Ring;
    }
    if line.starts_with('+') || line.starts_with('^') {
        if let Some(colon) = line.find(':') {
            return Response::Info {
                prefix: line[..colon].trim_end().to_string(),
                data: line[colon + 1..].trim().to_string(),
            };
        }
    }
    Response::Text(line.to_string())
}

/// Numeric code of a `+CME ERROR:` payload, numeric or verbose.
pub fn cme_code(text: &str) -> Option<u16> {
    let text = text.trim();
    if let Ok(code) = text.parse() {
        return Some(code);
    }
    let code = match text.to_ascii_lowercase().as_str() {
        "phone failure" => 0,
        "no connection to phone" => 1,
        "operation not allowed" => 3,
        "operation not supported" => 4,
        "ph-sim pin required" => 5,
        "sim not inserted" => 10,
        "sim pin required" => 11,
        "sim puk required" => 12,
        "sim failure" => 13,
        "sim busy" => 14,
        "sim wrong" => 15,
        "incorrect password" => 16,
        "sim pin2 required" => 17,
        "sim puk2 required" => 18,
        "memory full" => 20,
        "invalid index" => 21,
        "not found" => 22,
        "memory failure" => 23,
        "no network service" => 30,
        "network timeout" => 31,
        "network not allowed - emergency calls only" => 32,
        "unknown" => 100,
        _ => return None,
    };
    Some(code)
}

/// Data part of an information line with the given prefix.
///
/// Accepts both `+X: data` and `+X:data`.
pub fn info_data<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = line.trim().strip_prefix(prefix)?;
    let rest = rest.trim_start().strip_prefix(':')?;
    Some(rest.trim())
}

/// Split comma separated fields, honouring double quotes.
///
/// Quotes are removed and unquoted fields are trimmed. Empty fields are
/// kept as empty strings.
pub fn split_fields(data: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut was_quoted = false;
    for c in data.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                was_quoted = true;
            }
            ',' if !quoted => {
                fields.push(finish_field(&current, was_quoted));
                current.clear();
                was_quoted = false;
            }
            _ => current.push(c),
        }
    }
    fields.push(finish_field(&current, was_quoted));
    fields
}

fn finish_field(raw: &str, quoted: bool) -> String {
    if quoted {
        raw.trim_matches(|c: char| c == ' ').to_string()
    } else {
        raw.trim().to_string()
    }
}

/// Contents of every top-level parenthesised group, quotes honoured.
fn split_groups(data: &str) -> Vec<String> {
    let mut groups = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quoted = false;
    for c in data.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                if depth > 0 {
                    current.push(c);
                }
            }
            '(' if !quoted => {
                if depth > 0 {
                    current.push(c);
                }
                depth += 1;
            }
            ')' if !quoted && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    groups.push(std::mem::take(&mut current));
                } else {
                    current.push(c);
                }
            }
            _ if depth > 0 => current.push(c),
            _ => {}
        }
    }
    groups
}

fn field_u8(fields: &[String], i: usize) -> Option<u8> {
    fields.get(i)?.trim().parse().ok()
}

/// Registration status from `+CREG`.
///
/// Both the unsolicited form `+CREG: <stat>[,<lac>,<ci>]` and the query
/// form `+CREG: <n>,<stat>[,<lac>,<ci>]` are recognised. In the URC form
/// the second field is a quoted hex location code, never a bare number.
pub fn parse_creg(line: &str) -> Option<RegistrationStatus> {
    let data = info_data(line, "+CREG").or_else(|| info_data(line, "+CGREG"))?;
    let raw: Vec<&str> = data.split(',').map(str::trim).collect();
    let stat = match raw.as_slice() {
        [stat] => stat.parse::<u8>().ok()?,
        [first, second, ..] => match second.parse::<u8>() {
            Ok(stat) => stat,
            Err(_) => first.parse::<u8>().ok()?,
        },
        [] => return None,
    };
    RegistrationStatus::from_code(stat)
}

/// Calling-line identity from `+CLIP: "<number>",<type>[,<subaddr>,<satype>,<alpha>,<validity>]`.
pub fn parse_clip(line: &str) -> Option<CallerId> {
    let data = info_data(line, "+CLIP")?;
    let fields = split_fields(data);
    let number = fields.first()?.clone();
    Some(CallerId {
        number,
        type_of_address: field_u8(&fields, 1).unwrap_or(129),
        name: fields.get(4).filter(|s| !s.is_empty()).cloned(),
    })
}

/// Waiting caller from `+CCWA: "<number>",<type>,<class>[,<alpha>]`.
pub fn parse_ccwa(line: &str) -> Option<CallerId> {
    let data = info_data(line, "+CCWA")?;
    let fields = split_fields(data);
    let number = fields.first()?.clone();
    Some(CallerId {
        number,
        type_of_address: field_u8(&fields, 1).unwrap_or(129),
        name: fields.get(3).filter(|s| !s.is_empty()).cloned(),
    })
}

/// Call state reported by `+CLCC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClccStat {
    Active,
    Held,
    Dialing,
    Alerting,
    Incoming,
    Waiting,
}

impl ClccStat {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ClccStat::Active),
            1 => Some(ClccStat::Held),
            2 => Some(ClccStat::Dialing),
            3 => Some(ClccStat::Alerting),
            4 => Some(ClccStat::Incoming),
            5 => Some(ClccStat::Waiting),
            _ => None,
        }
    }
}

/// One `+CLCC` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClccEntry {
    pub index: u8,
    /// Mobile-originated call.
    pub outgoing: bool,
    pub stat: ClccStat,
    pub voice: bool,
    pub number: Option<String>,
}

/// Parse `+CLCC: <id>,<dir>,<stat>,<mode>,<mpty>[,"<number>",<type>]`.
pub fn parse_clcc(line: &str) -> Option<ClccEntry> {
    let data = info_data(line, "+CLCC")?;
    let fields = split_fields(data);
    Some(ClccEntry {
        index: field_u8(&fields, 0)?,
        outgoing: field_u8(&fields, 1)? == 0,
        stat: ClccStat::from_code(field_u8(&fields, 2)?)?,
        voice: field_u8(&fields, 3)? == 0,
        number: fields.get(5).filter(|s| !s.is_empty()).cloned(),
    })
}

/// Signal quality from `+CSQ: <rssi>,<ber>`.
pub fn parse_csq(line: &str) -> Option<Coverage> {
    let data = info_data(line, "+CSQ")?;
    let fields = split_fields(data);
    Some(Coverage {
        rssi: field_u8(&fields, 0)?,
        ber: field_u8(&fields, 1).unwrap_or(99),
    })
}

/// A `+CUSD` report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UssdReply {
    /// 0 no further action, 1 further action required, 2 terminated by
    /// network, 4 not supported, 5 timed out.
    pub status: u8,
    pub text: Option<String>,
    pub dcs: Option<u8>,
}

impl UssdReply {
    /// Whether the network ended the session with an error status.
    pub fn is_failure(&self) -> bool {
        matches!(self.status, 2 | 4 | 5)
    }
}

/// Parse `+CUSD: <status>[,"<text>"[,<dcs>]]`.
pub fn parse_cusd(line: &str) -> Option<UssdReply> {
    let data = info_data(line, "+CUSD")?;
    let fields = split_fields(data);
    Some(UssdReply {
        status: field_u8(&fields, 0)?,
        text: fields.get(1).cloned(),
        dcs: field_u8(&fields, 2),
    })
}

/// Operator list from `+COPS: (<stat>,"long","short","numeric"[,<act>]),...,,(modes),(formats)`.
///
/// Trailing mode/format range groups are skipped.
pub fn parse_cops_list(line: &str) -> Option<Vec<Operator>> {
    let data = info_data(line, "+COPS")?;
    if !data.starts_with('(') {
        return None;
    }
    let operators = split_groups(data)
        .iter()
        .map(|g| split_fields(g))
        .filter(|f| f.len() >= 4)
        .filter_map(|f| {
            Some(Operator {
                status: OperatorStatus::from_code(f[0].parse().ok()?),
                long_name: f[1].clone(),
                short_name: f[2].clone(),
                numeric: f[3].clone(),
            })
        })
        .collect();
    Some(operators)
}

/// Current operator name from `+COPS: <mode>[,<format>,"<oper>"]`.
pub fn parse_cops_current(line: &str) -> Option<String> {
    let data = info_data(line, "+COPS")?;
    if data.starts_with('(') {
        return None;
    }
    split_fields(data).get(2).filter(|s| !s.is_empty()).cloned()
}

/// Message reference from `+CMGS: <mr>`.
pub fn parse_cmgs(line: &str) -> Option<u8> {
    let data = info_data(line, "+CMGS")?;
    split_fields(data).first()?.parse::<u16>().ok().map(|mr| mr as u8)
}

/// Header of a directly delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmtHeader {
    /// `+CMT: [<alpha>],<length>`; the PDU follows on the next line.
    Pdu { length: usize },
    /// `+CMT: "<oa>",[<alpha>],"<scts>"`; the text follows on the next line.
    Text { sender: String, timestamp: String },
}

/// Parse a `+CMT` header.
pub fn parse_cmt(line: &str) -> Option<CmtHeader> {
    let data = info_data(line, "+CMT")?;
    let fields = split_fields(data);
    if fields.len() == 2 {
        if let Ok(length) = fields[1].parse() {
            return Some(CmtHeader::Pdu { length });
        }
    }
    Some(CmtHeader::Text {
        sender: fields.first()?.clone(),
        timestamp: fields.get(2).cloned().unwrap_or_default(),
    })
}

/// Storage and index from `+CMTI: "<mem>",<index>`.
pub fn parse_cmti(line: &str) -> Option<(String, u16)> {
    let data = info_data(line, "+CMTI")?;
    let fields = split_fields(data);
    let index = fields.get(1)?.parse().ok()?;
    Some((fields[0].clone(), index))
}

/// Header of a message read back with `AT+CMGR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmgrHeader {
    /// `+CMGR: <stat>,[<alpha>],<length>`.
    Pdu { length: usize },
    /// `+CMGR: "<stat>","<oa>",[<alpha>],"<scts>"`.
    Text { sender: String, timestamp: String },
}

/// Parse a `+CMGR` header.
pub fn parse_cmgr(line: &str) -> Option<CmgrHeader> {
    let data = info_data(line, "+CMGR")?;
    let fields = split_fields(data);
    if fields.first()?.parse::<u8>().is_ok() {
        let length = fields.last()?.parse().ok()?;
        return Some(CmgrHeader::Pdu { length });
    }
    Some(CmgrHeader::Text {
        sender: fields.get(1)?.clone(),
        timestamp: fields.get(3).cloned().unwrap_or_default(),
    })
}

/// SIM state from `+CPIN: <code>`.
pub fn parse_cpin(line: &str) -> Option<SimState> {
    info_data(line, "+CPIN").map(SimState::from_cpin)
}

/// Service-centre address from `+CSCA: "<address>",<type>`.
pub fn parse_csca(line: &str) -> Option<String> {
    let data = info_data(line, "+CSCA")?;
    split_fields(data).into_iter().next().filter(|s| !s.is_empty())
}

/// Detected digit from `+DTMF: <digit>`.
pub fn parse_dtmf(line: &str) -> Option<char> {
    let data = info_data(line, "+DTMF")?;
    let digit = data.trim_matches('"').chars().next()?;
    is_dtmf_digit(digit).then_some(digit)
}

/// Whether `c` is a valid DTMF tone.
pub fn is_dtmf_digit(c: char) -> bool {
    matches!(c, '0'..='9' | '*' | '#' | 'A'..='D')
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // classify
    // -----------------------------------------------------------------------

    #[test]
    fn classify_final_results() {
        assert_eq!(classify("OK"), Response::Ok);
        assert_eq!(classify("ERROR"), Response::Error);
        assert_eq!(classify("NO CARRIER"), Response::NoCarrier);
        assert_eq!(classify("BUSY"), Response::Busy);
        assert_eq!(classify("NO ANSWER"), Response::NoAnswer);
        assert_eq!(classify("NO DIALTONE"), Response::NoDialtone);
        assert_eq!(classify("CONNECT 9600"), Response::Connect);
        assert!(classify("OK").is_final());
        assert!(!classify("RING").is_final());
    }

    #[test]
    fn classify_cme_numeric_and_verbose() {
        assert_eq!(classify("+CME ERROR: 13").cme_code(), Some(13));
        assert_eq!(classify("+CME ERROR: SIM not inserted").cme_code(), Some(10));
        assert_eq!(classify("+CME ERROR: unknown").cme_code(), Some(100));
        assert_eq!(classify("+CME ERROR: something odd").cme_code(), None);
        assert!(classify("+CME ERROR: 3").is_error());
    }

    #[test]
    fn classify_cms_error() {
        assert_eq!(
            classify("+CMS ERROR: 500"),
            Response::CmsError {
                code: Some(500),
                text: "500".into()
            }
        );
    }

    #[test]
    fn classify_ring_variants() {
        assert_eq!(classify("RING"), Response::Ring);
        assert_eq!(classify("+CRING: VOICE"), Response::Ring);
    }

    #[test]
    fn classify_info_and_text() {
        assert_eq!(
            classify("+CREG: 0,1"),
            Response::Info {
                prefix: "+CREG".into(),
                data: "0,1".into()
            }
        );
        assert_eq!(
            classify("865067021234567"),
            Response::Text("865067021234567".into())
        );
    }

    // -----------------------------------------------------------------------
    // field splitting
    // -----------------------------------------------------------------------

    #[test]
    fn split_fields_with_quotes() {
        assert_eq!(
            split_fields(r#""+8613800138000","","24/01/05,10:20:30+32""#),
            vec!["+8613800138000", "", "24/01/05,10:20:30+32"]
        );
        assert_eq!(split_fields("1,,3"), vec!["1", "", "3"]);
    }

    // -----------------------------------------------------------------------
    // typed parsers
    // -----------------------------------------------------------------------

    #[test]
    fn creg_both_forms() {
        assert_eq!(parse_creg("+CREG: 1"), Some(RegistrationStatus::Home));
        assert_eq!(parse_creg("+CREG: 0,5"), Some(RegistrationStatus::Roaming));
        assert_eq!(
            parse_creg(r#"+CREG: 2,"1A2B","0C3D""#),
            Some(RegistrationStatus::Searching)
        );
        assert_eq!(
            parse_creg(r#"+CREG: 2,1,"1A2B","0C3D""#),
            Some(RegistrationStatus::Home)
        );
        assert_eq!(parse_creg("+CREG: 9"), None);
        assert_eq!(parse_creg("+CSQ: 9,0"), None);
    }

    #[test]
    fn clip_number_and_name() {
        let id = parse_clip(r#"+CLIP: "12345",129,,,"#).unwrap();
        assert_eq!(id.number, "12345");
        assert_eq!(id.type_of_address, 129);
        assert_eq!(id.name, None);

        let id = parse_clip(r#"+CLIP: "+441234",145,"",0,"Alice",0"#).unwrap();
        assert_eq!(id.type_of_address, 145);
        assert_eq!(id.name.as_deref(), Some("Alice"));
    }

    #[test]
    fn ccwa_number() {
        let id = parse_ccwa(r#"+CCWA: "5551234",129,1"#).unwrap();
        assert_eq!(id.number, "5551234");
    }

    #[test]
    fn clcc_entry() {
        let e = parse_clcc(r#"+CLCC: 1,0,3,0,0,"100",129,"""#).unwrap();
        assert_eq!(e.index, 1);
        assert!(e.outgoing);
        assert_eq!(e.stat, ClccStat::Alerting);
        assert!(e.voice);
        assert_eq!(e.number.as_deref(), Some("100"));

        let e = parse_clcc("+CLCC: 1,1,4,0,0").unwrap();
        assert!(!e.outgoing);
        assert_eq!(e.stat, ClccStat::Incoming);
        assert_eq!(e.number, None);
    }

    #[test]
    fn csq_values() {
        assert_eq!(parse_csq("+CSQ: 21,0"), Some(Coverage { rssi: 21, ber: 0 }));
        assert!(parse_csq("+CSQ: 99,99").unwrap().is_no_signal());
    }

    #[test]
    fn cusd_reply() {
        let r = parse_cusd(r#"+CUSD: 0,"Balance: 10.00, valid 2025/01/01",15"#).unwrap();
        assert_eq!(r.status, 0);
        assert_eq!(r.text.as_deref(), Some("Balance: 10.00, valid 2025/01/01"));
        assert_eq!(r.dcs, Some(15));
        assert!(!r.is_failure());

        let r = parse_cusd("+CUSD: 4").unwrap();
        assert!(r.is_failure());
        assert_eq!(r.text, None);
    }

    #[test]
    fn cops_list_skips_ranges() {
        let ops = parse_cops_list(
            r#"+COPS: (2,"CHINA MOBILE","CMCC","46000"),(3,"CHN-UNICOM","UNICOM","46001"),,(0-4),(0-2)"#,
        )
        .unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].status, OperatorStatus::Current);
        assert_eq!(ops[0].long_name, "CHINA MOBILE");
        assert_eq!(ops[1].status, OperatorStatus::Forbidden);
        assert_eq!(ops[1].numeric, "46001");
    }

    #[test]
    fn cops_current_name() {
        assert_eq!(
            parse_cops_current(r#"+COPS: 0,0,"Vodafone UK""#).as_deref(),
            Some("Vodafone UK")
        );
        assert_eq!(parse_cops_current("+COPS: 0"), None);
    }

    #[test]
    fn cmgs_reference() {
        assert_eq!(parse_cmgs("+CMGS: 12"), Some(12));
        assert_eq!(parse_cmgs("+CMGS: 300"), Some(44));
    }

    #[test]
    fn cmt_pdu_and_text_headers() {
        assert_eq!(parse_cmt("+CMT: ,24"), Some(CmtHeader::Pdu { length: 24 }));
        assert_eq!(
            parse_cmt(r#"+CMT: "+8613800138000","","24/01/05,10:20:30+32""#),
            Some(CmtHeader::Text {
                sender: "+8613800138000".into(),
                timestamp: "24/01/05,10:20:30+32".into()
            })
        );
    }

    #[test]
    fn cmti_and_cmgr() {
        assert_eq!(parse_cmti(r#"+CMTI: "SM",3"#), Some(("SM".into(), 3)));
        assert_eq!(parse_cmgr("+CMGR: 0,,27"), Some(CmgrHeader::Pdu { length: 27 }));
        assert_eq!(
            parse_cmgr(r#"+CMGR: "REC UNREAD","+15551234","","24/02/01,08:00:00+00""#),
            Some(CmgrHeader::Text {
                sender: "+15551234".into(),
                timestamp: "24/02/01,08:00:00+00".into()
            })
        );
    }

    #[test]
    fn cpin_csca_dtmf() {
        assert_eq!(parse_cpin("+CPIN: READY"), Some(SimState::Ready));
        assert_eq!(parse_cpin("+CPIN: SIM PIN"), Some(SimState::PinRequired));
        assert_eq!(
            parse_csca(r#"+CSCA: "+447785016005",145"#).as_deref(),
            Some("+447785016005")
        );
        assert_eq!(parse_dtmf("+DTMF: 5"), Some('5'));
        assert_eq!(parse_dtmf("+DTMF:#"), Some('#'));
        assert_eq!(parse_dtmf("+DTMF: x"), None);
    }
}
