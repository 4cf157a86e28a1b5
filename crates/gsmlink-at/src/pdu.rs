//! SMS PDU codec (3GPP TS 23.040 / 23.038).
//!
//! PDUs travel over the AT link as ASCII hex. This module converts between
//! that hex and decoded messages:
//!
//! - [`encode_submit`] builds one or more SMS-SUBMIT PDUs for a text,
//!   choosing the GSM 7-bit alphabet when every character fits and UCS-2
//!   otherwise, splitting long texts with a concatenation header.
//! - [`decode_deliver`] parses an SMS-DELIVER PDU as read from `+CMT` or
//!   `+CMGR`.
//!
//! # SMS-SUBMIT layout
//!
//! ```text
//! 00        SMSC length (0: use the SIM's default)
//! 11 / 51   first octet: SUBMIT, relative validity (+ UDHI)
//! 00        message reference (set by the module)
//! 0B 91 ..  destination: digit count, type of address, semi-octets
//! 00        protocol identifier
//! 00 / 08   data coding scheme: GSM 7-bit / UCS-2
//! AA        validity period (4 days)
//! nn ..     user data length, user data
//! ```

use gsmlink_core::error::{Error, Result};
use gsmlink_core::types::ConcatPart;

/// Maximum septets in a single GSM 7-bit message.
pub const MAX_GSM7_SEPTETS: usize = 160;
/// Maximum septets per part when a concatenation header is present.
pub const MAX_GSM7_PART_SEPTETS: usize = 153;
/// Maximum UCS-2 code units in a single message.
pub const MAX_UCS2_UNITS: usize = 70;
/// Maximum UCS-2 code units per concatenated part.
pub const MAX_UCS2_PART_UNITS: usize = 67;

const VALIDITY_4_DAYS: u8 = 0xAA;
const ESCAPE: u8 = 0x1B;

#[rustfmt::skip]
const GSM7_BASIC: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å',
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\u{1b}', 'Æ', 'æ', 'ß', 'É',
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/',
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?',
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O',
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§',
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o',
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à',
];

/// Extension table entries, reached through the escape septet.
const GSM7_EXTENSION: [(u8, char); 10] = [
    (0x0A, '\u{0c}'),
    (0x14, '^'),
    (0x28, '{'),
    (0x29, '}'),
    (0x2F, '\\'),
    (0x3C, '['),
    (0x3D, '~'),
    (0x3E, ']'),
    (0x40, '|'),
    (0x65, '€'),
];

/// Character repertoire selected by a data coding scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alphabet {
    Gsm7,
    Eight,
    Ucs2,
}

impl Alphabet {
    /// Derive the alphabet from a TP-DCS octet.
    pub fn from_dcs(dcs: u8) -> Self {
        match dcs >> 4 {
            // General data coding, possibly compressed/classed.
            0x0..=0x3 => match (dcs >> 2) & 0x03 {
                0x01 => Alphabet::Eight,
                0x02 => Alphabet::Ucs2,
                _ => Alphabet::Gsm7,
            },
            0xE => Alphabet::Ucs2,
            0xF if dcs & 0x04 != 0 => Alphabet::Eight,
            _ => Alphabet::Gsm7,
        }
    }

    fn dcs(self) -> u8 {
        match self {
            Alphabet::Gsm7 => 0x00,
            Alphabet::Eight => 0x04,
            Alphabet::Ucs2 => 0x08,
        }
    }
}

// ---------------------------------------------------------------------------
// Hex
// ---------------------------------------------------------------------------

/// Uppercase hex encoding.
pub fn hex_encode(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0F) as usize] as char);
    }
    out
}

/// Decode a hex string; whitespace is not allowed.
pub fn hex_decode(hex: &str) -> Result<Vec<u8>> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return Err(Error::Parse(format!("odd-length hex ({} digits)", hex.len())));
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = hex_nibble(pair[0])?;
            let lo = hex_nibble(pair[1])?;
            Ok((hi << 4) | lo)
        })
        .collect()
}

fn hex_nibble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::Parse(format!("invalid hex digit {:?}", c as char))),
    }
}

// ---------------------------------------------------------------------------
// Semi-octets and addresses
// ---------------------------------------------------------------------------

/// Swap digit pairs into semi-octets, padding an odd count with `F`.
pub fn encode_semi_octets(digits: &str) -> Vec<u8> {
    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let lo = semi_nibble(pair[0]);
            let hi = pair.get(1).map_or(0x0F, |&c| semi_nibble(c));
            (hi << 4) | lo
        })
        .collect()
}

fn semi_nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'*' => 0x0A,
        b'#' => 0x0B,
        b'a'..=b'c' => c - b'a' + 0x0C,
        _ => 0x0F,
    }
}

/// Read up to `max_digits` semi-octet digits, stopping at an `F` pad.
pub fn decode_semi_octets(bytes: &[u8], max_digits: usize) -> String {
    let mut out = String::with_capacity(max_digits);
    for &b in bytes {
        for nibble in [b & 0x0F, b >> 4] {
            if out.len() >= max_digits || nibble == 0x0F {
                return out;
            }
            out.push(match nibble {
                0..=9 => (b'0' + nibble) as char,
                0x0A => '*',
                0x0B => '#',
                n => (b'a' + n - 0x0C) as char,
            });
        }
    }
    out
}

/// Type-of-address octet and bare digits for a dialled number.
fn address_parts(number: &str) -> Result<(u8, String)> {
    let (toa, rest) = match number.strip_prefix('+') {
        Some(rest) => (0x91, rest),
        None => (0x81, number),
    };
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit() || b == b'*' || b == b'#') {
        return Err(Error::InvalidParameter(format!("invalid destination {number:?}")));
    }
    Ok((toa, rest.to_string()))
}

fn format_number(toa: u8, digits: String) -> String {
    if toa & 0x70 == 0x10 {
        format!("+{digits}")
    } else {
        digits
    }
}

// ---------------------------------------------------------------------------
// GSM 7-bit alphabet
// ---------------------------------------------------------------------------

/// Map text to GSM 7-bit septets, `None` if a character has no mapping.
pub fn encode_gsm7(text: &str) -> Option<Vec<u8>> {
    let mut septets = Vec::with_capacity(text.len());
    for c in text.chars() {
        if c != '\u{1b}' {
            if let Some(pos) = GSM7_BASIC.iter().position(|&g| g == c) {
                septets.push(pos as u8);
                continue;
            }
        }
        let &(code, _) = GSM7_EXTENSION.iter().find(|&&(_, e)| e == c)?;
        septets.push(ESCAPE);
        septets.push(code);
    }
    Some(septets)
}

/// Map GSM 7-bit septets back to text.
pub fn decode_gsm7(septets: &[u8]) -> String {
    let mut out = String::with_capacity(septets.len());
    let mut iter = septets.iter();
    while let Some(&s) = iter.next() {
        if s == ESCAPE {
            if let Some(&code) = iter.next() {
                match GSM7_EXTENSION.iter().find(|&&(c, _)| c == code) {
                    Some(&(_, ch)) => out.push(ch),
                    None => out.push(GSM7_BASIC[(code & 0x7F) as usize]),
                }
            }
            continue;
        }
        out.push(GSM7_BASIC[(s & 0x7F) as usize]);
    }
    out
}

/// Pack septets LSB-first after `fill_bits` zero bits.
pub fn pack_7bit(septets: &[u8], fill_bits: usize) -> Vec<u8> {
    let total_bits = fill_bits + septets.len() * 7;
    let mut out = vec![0u8; total_bits.div_ceil(8)];
    for (i, &s) in septets.iter().enumerate() {
        let bit = fill_bits + i * 7;
        let v = u16::from(s & 0x7F) << (bit % 8);
        out[bit / 8] |= v as u8;
        if v > 0xFF {
            out[bit / 8 + 1] |= (v >> 8) as u8;
        }
    }
    out
}

/// Unpack `count` septets stored after `fill_bits` padding bits.
pub fn unpack_7bit(data: &[u8], count: usize, fill_bits: usize) -> Result<Vec<u8>> {
    let needed = (fill_bits + count * 7).div_ceil(8);
    if data.len() < needed {
        return Err(Error::Parse(format!(
            "7-bit user data truncated: {count} septets need {needed} octets, have {}",
            data.len()
        )));
    }
    Ok((0..count)
        .map(|i| {
            let bit = fill_bits + i * 7;
            let lo = u16::from(data[bit / 8]);
            let hi = u16::from(data.get(bit / 8 + 1).copied().unwrap_or(0));
            (((hi << 8 | lo) >> (bit % 8)) & 0x7F) as u8
        })
        .collect())
}

// ---------------------------------------------------------------------------
// SMS-SUBMIT
// ---------------------------------------------------------------------------

/// One encoded SMS-SUBMIT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitPdu {
    /// Full PDU including the SMSC length octet, as hex.
    pub hex: String,
    /// TPDU length in octets, excluding the SMSC field; the `AT+CMGS` argument.
    pub tpdu_len: usize,
}

enum PartData {
    Gsm7(Vec<u8>),
    Ucs2(Vec<u16>),
}

/// Encode `text` for `destination`, split into as many parts as needed.
///
/// `reference` identifies the parts of one concatenated message.
pub fn encode_submit(destination: &str, text: &str, reference: u8) -> Result<Vec<SubmitPdu>> {
    let (toa, digits) = address_parts(destination)?;

    let parts: Vec<PartData> = match encode_gsm7(text) {
        Some(septets) if septets.len() <= MAX_GSM7_SEPTETS => vec![PartData::Gsm7(septets)],
        Some(septets) => split_septets(&septets)
            .into_iter()
            .map(PartData::Gsm7)
            .collect(),
        None => {
            let units: Vec<u16> = text.encode_utf16().collect();
            if units.len() <= MAX_UCS2_UNITS {
                vec![PartData::Ucs2(units)]
            } else {
                split_units(&units).into_iter().map(PartData::Ucs2).collect()
            }
        }
    };
    if parts.len() > usize::from(u8::MAX) {
        return Err(Error::InvalidParameter(format!(
            "message needs {} parts",
            parts.len()
        )));
    }

    let total = parts.len() as u8;
    let concatenated = total > 1;
    Ok(parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            let udh = concatenated.then(|| [0x05, 0x00, 0x03, reference, total, i as u8 + 1]);
            build_submit(toa, &digits, part, udh)
        })
        .collect())
}

fn build_submit(toa: u8, digits: &str, part: &PartData, udh: Option<[u8; 6]>) -> SubmitPdu {
    let mut tpdu = Vec::with_capacity(160);
    tpdu.push(if udh.is_some() { 0x51 } else { 0x11 });
    tpdu.push(0x00);
    tpdu.push(digits.len() as u8);
    tpdu.push(toa);
    tpdu.extend(encode_semi_octets(digits));
    tpdu.push(0x00);

    match part {
        PartData::Gsm7(septets) => {
            tpdu.push(Alphabet::Gsm7.dcs());
            tpdu.push(VALIDITY_4_DAYS);
            match udh {
                Some(header) => {
                    // 6 header octets plus 1 fill bit occupy 7 septets.
                    tpdu.push((7 + septets.len()) as u8);
                    tpdu.extend_from_slice(&header);
                    tpdu.extend(pack_7bit(septets, 1));
                }
                None => {
                    tpdu.push(septets.len() as u8);
                    tpdu.extend(pack_7bit(septets, 0));
                }
            }
        }
        PartData::Ucs2(units) => {
            tpdu.push(Alphabet::Ucs2.dcs());
            tpdu.push(VALIDITY_4_DAYS);
            let body: Vec<u8> = units.iter().flat_map(|u| u.to_be_bytes()).collect();
            let header_len = udh.map_or(0, |h| h.len());
            tpdu.push((header_len + body.len()) as u8);
            if let Some(header) = udh {
                tpdu.extend_from_slice(&header);
            }
            tpdu.extend(body);
        }
    }

    let mut pdu = Vec::with_capacity(tpdu.len() + 1);
    pdu.push(0x00);
    pdu.extend_from_slice(&tpdu);
    SubmitPdu {
        hex: hex_encode(&pdu),
        tpdu_len: tpdu.len(),
    }
}

/// Split septets into parts, never separating an escape from its code.
fn split_septets(septets: &[u8]) -> Vec<Vec<u8>> {
    let mut parts = Vec::new();
    let mut start = 0;
    while start < septets.len() {
        let mut end = (start + MAX_GSM7_PART_SEPTETS).min(septets.len());
        if end < septets.len() && septets[end - 1] == ESCAPE && !escape_is_code(septets, start, end - 1) {
            end -= 1;
        }
        parts.push(septets[start..end].to_vec());
        start = end;
    }
    parts
}

/// Whether the escape byte at `idx` is itself the code of a preceding escape.
fn escape_is_code(septets: &[u8], start: usize, idx: usize) -> bool {
    let run = septets[start..idx]
        .iter()
        .rev()
        .take_while(|&&s| s == ESCAPE)
        .count();
    run % 2 == 1
}

/// Split UTF-16 units into parts, never separating a surrogate pair.
fn split_units(units: &[u16]) -> Vec<Vec<u16>> {
    let mut parts = Vec::new();
    let mut start = 0;
    while start < units.len() {
        let mut end = (start + MAX_UCS2_PART_UNITS).min(units.len());
        if end < units.len() && (0xD800..0xDC00).contains(&units[end - 1]) {
            end -= 1;
        }
        parts.push(units[start..end].to_vec());
        start = end;
    }
    parts
}

// ---------------------------------------------------------------------------
// SMS-DELIVER
// ---------------------------------------------------------------------------

/// A decoded SMS-DELIVER.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverPdu {
    /// Service centre, absent when the SMSC length octet is zero.
    pub smsc: Option<String>,
    pub sender: String,
    pub pid: u8,
    pub dcs: u8,
    /// `YY/MM/DD,hh:mm:ss±zz`, zone in quarter hours.
    pub timestamp: String,
    pub concat: Option<ConcatPart>,
    pub text: String,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self, what: &str) -> Result<u8> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| Error::Parse(format!("PDU truncated reading {what}")))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| Error::Parse(format!("PDU truncated reading {what}")))?;
        self.pos = end;
        Ok(slice)
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.bytes[self.pos.min(self.bytes.len())..];
        self.pos = self.bytes.len();
        slice
    }
}

/// Decode an SMS-DELIVER PDU given as hex, SMSC field included.
pub fn decode_deliver(hex: &str) -> Result<DeliverPdu> {
    let bytes = hex_decode(hex)?;
    let mut r = Reader {
        bytes: &bytes,
        pos: 0,
    };

    let smsc_len = usize::from(r.u8("SMSC length")?);
    let smsc = if smsc_len == 0 {
        None
    } else {
        let toa = r.u8("SMSC type")?;
        let digits = r.take(smsc_len - 1, "SMSC address")?;
        Some(format_number(toa, decode_semi_octets(digits, (smsc_len - 1) * 2)))
    };

    let first = r.u8("first octet")?;
    if first & 0x03 != 0x00 {
        return Err(Error::Parse(format!(
            "not an SMS-DELIVER (first octet {first:02X})"
        )));
    }
    let udhi = first & 0x40 != 0;

    let oa_digits = usize::from(r.u8("sender length")?);
    let oa_toa = r.u8("sender type")?;
    let oa = r.take(oa_digits.div_ceil(2), "sender address")?;
    let sender = if oa_toa & 0x70 == 0x50 {
        // Alphanumeric sender, packed 7-bit.
        decode_gsm7(&unpack_7bit(oa, oa_digits * 4 / 7, 0)?)
    } else {
        format_number(oa_toa, decode_semi_octets(oa, oa_digits))
    };

    let pid = r.u8("protocol identifier")?;
    let dcs = r.u8("data coding scheme")?;
    let timestamp = decode_timestamp(r.take(7, "timestamp")?);
    let udl = usize::from(r.u8("user data length")?);
    let ud = r.rest();

    let (concat, header_len) = if udhi {
        let udhl = usize::from(*ud.first().ok_or_else(|| Error::Parse("missing UDH".into()))?);
        let header = ud
            .get(1..1 + udhl)
            .ok_or_else(|| Error::Parse("UDH truncated".into()))?;
        (parse_concat(header), udhl + 1)
    } else {
        (None, 0)
    };

    let text = match Alphabet::from_dcs(dcs) {
        Alphabet::Gsm7 => {
            let header_bits = header_len * 8;
            let fill = (7 - header_bits % 7) % 7;
            let skipped = (header_bits + fill) / 7;
            let count = udl.saturating_sub(skipped);
            decode_gsm7(&unpack_7bit(&ud[header_len.min(ud.len())..], count, fill)?)
        }
        Alphabet::Ucs2 => {
            let body = ud
                .get(header_len..udl)
                .ok_or_else(|| Error::Parse("UCS-2 user data truncated".into()))?;
            let units: Vec<u16> = body
                .chunks_exact(2)
                .map(|p| u16::from_be_bytes([p[0], p[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        Alphabet::Eight => {
            let body = ud
                .get(header_len..udl)
                .ok_or_else(|| Error::Parse("8-bit user data truncated".into()))?;
            String::from_utf8_lossy(body).into_owned()
        }
    };

    Ok(DeliverPdu {
        smsc,
        sender,
        pid,
        dcs,
        timestamp,
        concat,
        text,
    })
}

fn parse_concat(header: &[u8]) -> Option<ConcatPart> {
    let mut i = 0;
    while i + 1 < header.len() {
        let iei = header[i];
        let len = usize::from(header[i + 1]);
        let data = header.get(i + 2..i + 2 + len)?;
        match (iei, data) {
            (0x00, &[reference, total, sequence]) => {
                return Some(ConcatPart {
                    reference: u16::from(reference),
                    total,
                    sequence,
                });
            }
            (0x08, &[hi, lo, total, sequence]) => {
                return Some(ConcatPart {
                    reference: u16::from_be_bytes([hi, lo]),
                    total,
                    sequence,
                });
            }
            _ => {}
        }
        i += 2 + len;
    }
    None
}

fn decode_timestamp(scts: &[u8]) -> String {
    let d = |b: u8| format!("{}{}", b & 0x0F, (b >> 4) & 0x0F);
    let tz = scts[6];
    let quarters = (tz & 0x07) * 10 + (tz >> 4);
    let sign = if tz & 0x08 != 0 { '-' } else { '+' };
    format!(
        "{}/{}/{},{}:{}:{}{}{:02}",
        d(scts[0]),
        d(scts[1]),
        d(scts[2]),
        d(scts[3]),
        d(scts[4]),
        d(scts[5]),
        sign,
        quarters
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip_and_errors() {
        assert_eq!(hex_encode(&[0x00, 0xAB, 0x1F]), "00AB1F");
        assert_eq!(hex_decode("00ab1F").unwrap(), vec![0x00, 0xAB, 0x1F]);
        assert!(hex_decode("ABC").is_err());
        assert!(hex_decode("ZZ").is_err());
    }

    #[test]
    fn semi_octets_pad_odd_numbers() {
        assert_eq!(
            encode_semi_octets("46708251358"),
            vec![0x64, 0x07, 0x28, 0x15, 0x53, 0xF8]
        );
        assert_eq!(
            decode_semi_octets(&[0x64, 0x07, 0x28, 0x15, 0x53, 0xF8], 12),
            "46708251358"
        );
    }

    #[test]
    fn pack_known_vector() {
        let septets = encode_gsm7("hellohello").unwrap();
        assert_eq!(hex_encode(&pack_7bit(&septets, 0)), "E8329BFD4697D9EC37");
        let unpacked = unpack_7bit(&pack_7bit(&septets, 0), 10, 0).unwrap();
        assert_eq!(decode_gsm7(&unpacked), "hellohello");
    }

    #[test]
    fn gsm7_extension_characters() {
        let septets = encode_gsm7("€[x]").unwrap();
        assert_eq!(septets, vec![0x1B, 0x65, 0x1B, 0x3C, 0x78, 0x1B, 0x3E]);
        assert_eq!(decode_gsm7(&septets), "€[x]");
        assert_eq!(encode_gsm7("привет"), None);
    }

    #[test]
    fn unpack_rejects_truncated_data() {
        assert!(unpack_7bit(&[0xE8, 0x32], 10, 0).is_err());
    }

    #[test]
    fn encode_single_gsm7_submit() {
        let pdus = encode_submit("+46708251358", "hellohello", 0).unwrap();
        assert_eq!(pdus.len(), 1);
        assert_eq!(
            pdus[0].hex,
            "0011000B916407281553F80000AA0AE8329BFD4697D9EC37"
        );
        assert_eq!(pdus[0].tpdu_len, 23);
    }

    #[test]
    fn encode_national_number_type() {
        let pdus = encode_submit("100", "hi", 0).unwrap();
        // Three digits, type 0x81, "10" "0F".
        assert!(pdus[0].hex.starts_with("001100038101F0"));
    }

    #[test]
    fn encode_ucs2_submit() {
        let pdus = encode_submit("+12345", "你好", 0).unwrap();
        assert_eq!(pdus.len(), 1);
        assert!(pdus[0].hex.ends_with("0008AA044F60597D"));
    }

    #[test]
    fn encode_long_text_is_concatenated() {
        let text = "a".repeat(200);
        let pdus = encode_submit("+12345", &text, 0x42).unwrap();
        assert_eq!(pdus.len(), 2);
        // UDHI set, UDL 160 septets, header ref 0x42 part 1 of 2.
        assert!(pdus[0].hex.starts_with("0051"));
        assert!(pdus[0].hex.contains("0000AAA0050003420201"));
        // 47 septets remain: 7 + 47 = 54 = 0x36.
        assert!(pdus[1].hex.contains("0000AA36050003420202"));
    }

    #[test]
    fn escape_never_split_across_parts() {
        let mut text = "a".repeat(152);
        text.push('€');
        text.push_str("bc");
        let pdus = encode_submit("+1", &text, 1).unwrap();
        assert_eq!(pdus.len(), 2);
        // First part holds only the 152 plain septets.
        assert!(pdus[0].hex.contains("0000AA9F050003010201"));
    }

    #[test]
    fn invalid_destination_rejected() {
        assert!(matches!(
            encode_submit("12ab", "x", 0),
            Err(Error::InvalidParameter(_))
        ));
        assert!(encode_submit("+", "x", 0).is_err());
    }

    #[test]
    fn decode_deliver_with_smsc() {
        let pdu = decode_deliver(
            "07911326040000F0040B911346610089F60000208062917314080CC8F71D14969741F977FD07",
        )
        .unwrap();
        assert_eq!(pdu.smsc.as_deref(), Some("+31624000000"));
        assert_eq!(pdu.sender, "+31641600986");
        assert_eq!(pdu.text, "How are you?");
        assert!(pdu.timestamp.starts_with("02/08/26,19:37:41"));
        assert_eq!(pdu.concat, None);
    }

    #[test]
    fn zero_length_smsc_is_absent() {
        let pdu = decode_deliver(
            "00040B911346610089F60000208062917314080CC8F71D14969741F977FD07",
        )
        .unwrap();
        assert_eq!(pdu.smsc, None);
        assert_eq!(pdu.sender, "+31641600986");
        assert_eq!(pdu.pid, 0);
        assert_eq!(pdu.dcs, 0);
        assert_eq!(pdu.text, "How are you?");
    }

    #[test]
    fn decode_ucs2_concatenated_part() {
        // SMSC absent, UDHI, sender +12345, UCS-2, UDH ref 7 part 2 of 3, "好".
        let pdu = decode_deliver("004005912143F500084210101000000008050003070302597D").unwrap();
        assert_eq!(pdu.sender, "+12345");
        assert_eq!(
            pdu.concat,
            Some(ConcatPart {
                reference: 7,
                total: 3,
                sequence: 2
            })
        );
        assert_eq!(pdu.text, "好");
    }

    #[test]
    fn decode_rejects_submit_and_truncation() {
        assert!(decode_deliver("0011000B916407281553F80000AA0AE8329BFD4697D9EC37").is_err());
        assert!(decode_deliver("00040B9113").is_err());
    }

    #[test]
    fn dcs_alphabets() {
        assert_eq!(Alphabet::from_dcs(0x00), Alphabet::Gsm7);
        assert_eq!(Alphabet::from_dcs(0x08), Alphabet::Ucs2);
        assert_eq!(Alphabet::from_dcs(0x04), Alphabet::Eight);
        assert_eq!(Alphabet::from_dcs(0xF4), Alphabet::Eight);
        assert_eq!(Alphabet::from_dcs(0xF0), Alphabet::Gsm7);
    }
}
