//! DNS Wire Format
//!
//! Just enough of RFC 1035 (plus the RFC 6891 OPT record) to decode a single
//! question and encode an authoritative A/AAAA answer. Everything else in an
//! incoming message is skipped structurally so malformed packets are caught
//! before any lookup happens.

use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// DNS packet constants
pub const DNS_HEADER_SIZE: usize = 12;
pub const DNS_MAX_UDP_SIZE: usize = 512;
pub const DNS_MAX_TCP_SIZE: usize = 65535;
const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;

/// Size of an OPT pseudo-record with empty RDATA
const OPT_RECORD_SIZE: usize = 11;

/// Compression pointer to the question name, which always sits right after the header
const QUESTION_NAME_PTR: u16 = 0xC000 | DNS_HEADER_SIZE as u16;

/// DNS flags
pub const FLAG_QR: u16 = 0x8000; // Query/Response
pub const FLAG_AA: u16 = 0x0400; // Authoritative Answer
pub const FLAG_TC: u16 = 0x0200; // Truncated
pub const FLAG_RD: u16 = 0x0100; // Recursion Desired
const OPCODE_MASK: u16 = 0x7800;

/// DNS classes
pub const CLASS_IN: u16 = 1;
pub const CLASS_ANY: u16 = 255;

/// Failure to decode an incoming message
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("message truncated")]
    Truncated,

    #[error("message is a response, not a query")]
    NotAQuery,

    #[error("expected exactly one question, got {0}")]
    QuestionCount(u16),

    #[error("invalid label length {0}")]
    BadLabel(u8),

    #[error("name exceeds 255 bytes")]
    NameTooLong,

    #[error("compression pointer in question name")]
    PointerInQuestion,
}

/// Record types the seed cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
    Aaaa,
    Opt,
    Ixfr,
    Axfr,
    Any,
    Other(u16),
}

impl From<u16> for RecordType {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            28 => RecordType::Aaaa,
            41 => RecordType::Opt,
            251 => RecordType::Ixfr,
            252 => RecordType::Axfr,
            255 => RecordType::Any,
            other => RecordType::Other(other),
        }
    }
}

impl From<RecordType> for u16 {
    fn from(value: RecordType) -> Self {
        match value {
            RecordType::A => 1,
            RecordType::Aaaa => 28,
            RecordType::Opt => 41,
            RecordType::Ixfr => 251,
            RecordType::Axfr => 252,
            RecordType::Any => 255,
            RecordType::Other(other) => other,
        }
    }
}

/// Response codes used by the seed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    NoError = 0,
    NxDomain = 3,
    NotImp = 4,
}

impl ResponseCode {
    #[cfg(test)]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ResponseCode::NoError),
            3 => Some(ResponseCode::NxDomain),
            4 => Some(ResponseCode::NotImp),
            _ => None,
        }
    }
}

/// Fixed 12-byte message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub flags: u16,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Header {
    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < DNS_HEADER_SIZE {
            return Err(WireError::Truncated);
        }
        let word = |i: usize| u16::from_be_bytes([data[i], data[i + 1]]);

        Ok(Self {
            id: word(0),
            flags: word(2),
            qdcount: word(4),
            ancount: word(6),
            nscount: word(8),
            arcount: word(10),
        })
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }

    pub fn opcode(&self) -> u8 {
        ((self.flags & OPCODE_MASK) >> 11) as u8
    }

    #[cfg(test)]
    pub fn rcode(&self) -> u8 {
        (self.flags & 0x000F) as u8
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.id.to_be_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
        out.extend_from_slice(&self.qdcount.to_be_bytes());
        out.extend_from_slice(&self.ancount.to_be_bytes());
        out.extend_from_slice(&self.nscount.to_be_bytes());
        out.extend_from_slice(&self.arcount.to_be_bytes());
    }
}

/// The single question of a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Lower-cased labels, without the root
    pub labels: Vec<String>,
    pub qtype: RecordType,
    pub qclass: u16,
}

impl Question {
    /// Dotted lower-case name without trailing dot
    pub fn name(&self) -> String {
        self.labels.join(".")
    }
}

/// A decoded query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub header: Header,
    pub question: Question,

    /// Question section exactly as received, echoed back in the response
    raw_question: Vec<u8>,

    /// UDP payload size advertised in an OPT record, if any
    pub edns_udp_size: Option<u16>,
}

impl Query {
    /// Decode a query. Anything that is not a well-formed single-question
    /// query is an error.
    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        let header = Header::parse(data)?;

        if header.is_response() {
            return Err(WireError::NotAQuery);
        }
        if header.qdcount != 1 {
            return Err(WireError::QuestionCount(header.qdcount));
        }

        let (labels, mut offset) = parse_question_name(data, DNS_HEADER_SIZE)?;
        let fixed = take(data, offset, 4)?;
        let qtype = RecordType::from(u16::from_be_bytes([fixed[0], fixed[1]]));
        let qclass = u16::from_be_bytes([fixed[2], fixed[3]]);
        offset += 4;
        let raw_question = data[DNS_HEADER_SIZE..offset].to_vec();

        // Answer and authority records are not expected in a query, but a
        // well-formed one must still be walkable to reach the OPT record.
        for _ in 0..(header.ancount as usize + header.nscount as usize) {
            offset = skip_record(data, offset)?.0;
        }

        let mut edns_udp_size = None;
        for _ in 0..header.arcount {
            let (next, rtype, class) = skip_record(data, offset)?;
            if rtype == RecordType::Opt {
                edns_udp_size = Some(class);
            }
            offset = next;
        }

        Ok(Self {
            header,
            question: Question {
                labels,
                qtype,
                qclass,
            },
            raw_question,
            edns_udp_size,
        })
    }

    #[cfg(test)]
    pub fn recursion_desired(&self) -> bool {
        self.header.flags & FLAG_RD != 0
    }
}

/// Answer payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
}

impl RData {
    fn record_type(&self) -> RecordType {
        match self {
            RData::A(_) => RecordType::A,
            RData::Aaaa(_) => RecordType::Aaaa,
        }
    }

    /// Encoded size of a full answer record using a name pointer
    fn encoded_len(&self) -> usize {
        // name ptr + type + class + ttl + rdlength
        let fixed = 2 + 2 + 2 + 4 + 2;
        match self {
            RData::A(_) => fixed + 4,
            RData::Aaaa(_) => fixed + 16,
        }
    }
}

/// Everything needed to encode a response
#[derive(Debug, Clone)]
pub struct Response<'a> {
    pub query: &'a Query,
    pub rcode: ResponseCode,
    pub answers: &'a [RData],
    pub ttl: u32,

    /// Hard limit on the encoded size
    pub max_size: usize,

    /// Payload size to advertise in a response OPT record
    pub edns_udp_size: Option<u16>,
}

/// Encoded response and whether answers were cut to fit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub answer_count: usize,
    pub truncated: bool,
}

impl Response<'_> {
    pub fn encode(&self) -> Encoded {
        let mut out = Vec::with_capacity(self.max_size.min(DNS_MAX_UDP_SIZE * 2));

        let opt_reserve = if self.edns_udp_size.is_some() { OPT_RECORD_SIZE } else { 0 };
        let budget = self.max_size.saturating_sub(opt_reserve);

        let mut fitting = 0;
        let mut size = DNS_HEADER_SIZE + self.query.raw_question.len();
        for answer in self.answers {
            if size + answer.encoded_len() > budget {
                break;
            }
            size += answer.encoded_len();
            fitting += 1;
        }
        let truncated = fitting < self.answers.len();

        let mut flags = FLAG_QR
            | FLAG_AA
            | (self.query.header.flags & (OPCODE_MASK | FLAG_RD))
            | self.rcode as u16;
        if truncated {
            flags |= FLAG_TC;
        }

        Header {
            id: self.query.header.id,
            flags,
            qdcount: 1,
            ancount: fitting as u16,
            nscount: 0,
            arcount: u16::from(self.edns_udp_size.is_some()),
        }
        .write(&mut out);

        out.extend_from_slice(&self.query.raw_question);

        for answer in &self.answers[..fitting] {
            out.extend_from_slice(&QUESTION_NAME_PTR.to_be_bytes());
            out.extend_from_slice(&u16::from(answer.record_type()).to_be_bytes());
            out.extend_from_slice(&CLASS_IN.to_be_bytes());
            out.extend_from_slice(&self.ttl.to_be_bytes());
            match answer {
                RData::A(ip) => {
                    out.extend_from_slice(&4u16.to_be_bytes());
                    out.extend_from_slice(&ip.octets());
                }
                RData::Aaaa(ip) => {
                    out.extend_from_slice(&16u16.to_be_bytes());
                    out.extend_from_slice(&ip.octets());
                }
            }
        }

        if let Some(udp_size) = self.edns_udp_size {
            out.push(0); // root name
            out.extend_from_slice(&u16::from(RecordType::Opt).to_be_bytes());
            out.extend_from_slice(&udp_size.to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes()); // extended rcode, version, flags
            out.extend_from_slice(&0u16.to_be_bytes()); // rdlength
        }

        Encoded {
            bytes: out,
            answer_count: fitting,
            truncated,
        }
    }
}

fn take(data: &[u8], offset: usize, len: usize) -> Result<&[u8], WireError> {
    data.get(offset..offset + len).ok_or(WireError::Truncated)
}

/// Parse an uncompressed name starting at `offset`
fn parse_question_name(data: &[u8], mut offset: usize) -> Result<(Vec<String>, usize), WireError> {
    let mut labels = Vec::new();
    let mut name_len = 1;

    loop {
        let len = *data.get(offset).ok_or(WireError::Truncated)?;
        offset += 1;

        if len == 0 {
            break;
        }
        if len & 0xC0 == 0xC0 {
            return Err(WireError::PointerInQuestion);
        }
        if len as usize > MAX_LABEL_LEN {
            return Err(WireError::BadLabel(len));
        }

        name_len += len as usize + 1;
        if name_len > MAX_NAME_LEN {
            return Err(WireError::NameTooLong);
        }

        let label = take(data, offset, len as usize)?;
        labels.push(String::from_utf8_lossy(label).to_ascii_lowercase());
        offset += len as usize;
    }

    Ok((labels, offset))
}

/// Skip a possibly compressed name, returning the offset after it
fn skip_name(data: &[u8], mut offset: usize) -> Result<usize, WireError> {
    loop {
        let len = *data.get(offset).ok_or(WireError::Truncated)?;
        match len {
            0 => return Ok(offset + 1),
            l if l & 0xC0 == 0xC0 => {
                take(data, offset, 2)?;
                return Ok(offset + 2);
            }
            l if l as usize > MAX_LABEL_LEN => return Err(WireError::BadLabel(l)),
            l => {
                take(data, offset + 1, l as usize)?;
                offset += 1 + l as usize;
            }
        }
    }
}

/// Skip one resource record, returning (next offset, type, class)
fn skip_record(data: &[u8], offset: usize) -> Result<(usize, RecordType, u16), WireError> {
    let offset = skip_name(data, offset)?;
    let fixed = take(data, offset, 10)?;
    let rtype = RecordType::from(u16::from_be_bytes([fixed[0], fixed[1]]));
    let class = u16::from_be_bytes([fixed[2], fixed[3]]);
    let rdlength = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;
    take(data, offset + 10, rdlength)?;
    Ok((offset + 10 + rdlength, rtype, class))
}


#[cfg(test)]
mod tests {
    use super::decode::{build_query, decode_response};
    use super::*;

    #[test]
    fn test_parse_question() {
        let data = build_query(0x1234, "Seed.Example.COM", 1, None);
        let query = Query::parse(&data).unwrap();

        assert_eq!(query.header.id, 0x1234);
        assert_eq!(query.question.name(), "seed.example.com");
        assert_eq!(query.question.qtype, RecordType::A);
        assert_eq!(query.question.qclass, CLASS_IN);
        assert!(query.recursion_desired());
        assert_eq!(query.edns_udp_size, None);
    }

    #[test]
    fn test_parse_edns_payload() {
        let data = build_query(1, "seed.example.com", 28, Some(1232));
        let query = Query::parse(&data).unwrap();
        assert_eq!(query.question.qtype, RecordType::Aaaa);
        assert_eq!(query.edns_udp_size, Some(1232));
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(Query::parse(&[]), Err(WireError::Truncated));
        assert_eq!(Query::parse(&[0u8; 11]), Err(WireError::Truncated));

        // Header only, claims a question
        let mut data = build_query(1, "a.b", 1, None);
        data.truncate(DNS_HEADER_SIZE);
        assert_eq!(Query::parse(&data), Err(WireError::Truncated));

        // Missing qtype/qclass
        let mut data = build_query(1, "a.b", 1, None);
        data.truncate(data.len() - 3);
        assert_eq!(Query::parse(&data), Err(WireError::Truncated));

        // Label length runs past the end
        let mut data = build_query(1, "abc", 1, None);
        data[DNS_HEADER_SIZE] = 60;
        assert_eq!(Query::parse(&data), Err(WireError::Truncated));

        // Oversized label length
        let mut data = build_query(1, "abc", 1, None);
        data[DNS_HEADER_SIZE] = 64;
        assert_eq!(Query::parse(&data), Err(WireError::BadLabel(64)));

        // Compression pointer in question
        let mut data = build_query(1, "abc", 1, None);
        data[DNS_HEADER_SIZE] = 0xC0;
        assert_eq!(Query::parse(&data), Err(WireError::PointerInQuestion));

        // A response is not a query
        let mut data = build_query(1, "abc", 1, None);
        data[2] |= 0x80;
        assert_eq!(Query::parse(&data), Err(WireError::NotAQuery));

        // Two questions
        let mut data = build_query(1, "abc", 1, None);
        data[5] = 2;
        assert_eq!(Query::parse(&data), Err(WireError::QuestionCount(2)));
        data[5] = 0;
        assert_eq!(Query::parse(&data), Err(WireError::QuestionCount(0)));

        // Additional count promises a record that is not there
        let mut data = build_query(1, "abc", 1, None);
        data[11] = 1;
        assert_eq!(Query::parse(&data), Err(WireError::Truncated));
    }

    #[test]
    fn test_rejects_long_name() {
        let label = "a".repeat(63);
        let name = vec![label.as_str(); 5].join(".");
        let data = build_query(1, &name, 1, None);
        assert_eq!(Query::parse(&data), Err(WireError::NameTooLong));
    }

    #[test]
    fn test_response_roundtrip_a_records() {
        let query = Query::parse(&build_query(0xBEEF, "seed.example.com", 1, None)).unwrap();
        let ips: Vec<Ipv4Addr> = (1..=5).map(|i| Ipv4Addr::new(192, 168, 1, i)).collect();
        let answers: Vec<RData> = ips.iter().copied().map(RData::A).collect();

        let encoded = Response {
            query: &query,
            rcode: ResponseCode::NoError,
            answers: &answers,
            ttl: 60,
            max_size: DNS_MAX_UDP_SIZE,
            edns_udp_size: None,
        }
        .encode();

        assert!(!encoded.truncated);
        let decoded = decode_response(&encoded.bytes).unwrap();
        assert_eq!(decoded.header.id, 0xBEEF);
        assert!(decoded.header.is_response());
        assert_ne!(decoded.header.flags & FLAG_AA, 0);
        assert_ne!(decoded.header.flags & FLAG_RD, 0);
        assert_eq!(decoded.rcode(), Some(ResponseCode::NoError));
        assert_eq!(decoded.ipv4s(), ips);
        assert!(decoded.answers.iter().all(|a| a.ttl == 60));
    }

    #[test]
    fn test_response_echoes_question_case() {
        let data = build_query(7, "SeEd.Example.com", 28, None);
        let query = Query::parse(&data).unwrap();
        let encoded = Response {
            query: &query,
            rcode: ResponseCode::NxDomain,
            answers: &[],
            ttl: 60,
            max_size: DNS_MAX_UDP_SIZE,
            edns_udp_size: None,
        }
        .encode();

        assert_eq!(&encoded.bytes[DNS_HEADER_SIZE..], &data[DNS_HEADER_SIZE..]);
        let decoded = decode_response(&encoded.bytes).unwrap();
        assert_eq!(decoded.rcode(), Some(ResponseCode::NxDomain));
        assert!(decoded.answers.is_empty());
    }

    #[test]
    fn test_response_truncates_to_budget() {
        let query = Query::parse(&build_query(1, "seed.example.com", 28, None)).unwrap();
        let answers: Vec<RData> = (0..40u16)
            .map(|i| RData::Aaaa(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, i)))
            .collect();

        let udp = Response {
            query: &query,
            rcode: ResponseCode::NoError,
            answers: &answers,
            ttl: 60,
            max_size: DNS_MAX_UDP_SIZE,
            edns_udp_size: None,
        }
        .encode();

        assert!(udp.truncated);
        assert!(udp.bytes.len() <= DNS_MAX_UDP_SIZE);
        let decoded = decode_response(&udp.bytes).unwrap();
        assert!(decoded.truncated());
        assert_eq!(decoded.answers.len(), udp.answer_count);
        // 12 header + 22 question, 28 per AAAA record
        assert_eq!(udp.answer_count, (512 - 12 - 22) / 28);

        let tcp = Response {
            max_size: DNS_MAX_TCP_SIZE,
            ..udp_response(&query, &answers)
        }
        .encode();
        assert!(!tcp.truncated);
        assert_eq!(decode_response(&tcp.bytes).unwrap().ipv6s().len(), 40);
    }

    fn udp_response<'a>(query: &'a Query, answers: &'a [RData]) -> Response<'a> {
        Response {
            query,
            rcode: ResponseCode::NoError,
            answers,
            ttl: 60,
            max_size: DNS_MAX_UDP_SIZE,
            edns_udp_size: None,
        }
    }

    #[test]
    fn test_response_with_opt_record() {
        let query = Query::parse(&build_query(1, "seed.example.com", 1, Some(4096))).unwrap();
        let answers = [RData::A(Ipv4Addr::new(1, 2, 3, 4))];

        let encoded = Response {
            edns_udp_size: Some(1232),
            ..udp_response(&query, &answers)
        }
        .encode();

        let decoded = decode_response(&encoded.bytes).unwrap();
        assert_eq!(decoded.edns_udp_size, Some(1232));
        assert_eq!(decoded.header.arcount, 1);
        assert_eq!(decoded.ipv4s(), vec![Ipv4Addr::new(1, 2, 3, 4)]);
    }

    #[test]
    fn test_opcode_is_echoed() {
        let mut data = build_query(1, "seed.example.com", 1, None);
        data[2] |= 0x10; // opcode 2 (STATUS)
        let query = Query::parse(&data).unwrap();
        assert_eq!(query.header.opcode(), 2);

        let encoded = Response {
            rcode: ResponseCode::NotImp,
            ..udp_response(&query, &[])
        }
        .encode();
        let decoded = decode_response(&encoded.bytes).unwrap();
        assert_eq!(decoded.header.opcode(), 2);
        assert_eq!(decoded.rcode(), Some(ResponseCode::NotImp));
    }

    #[test]
    fn test_record_type_conversions() {
        for value in [1u16, 28, 41, 251, 252, 255, 16, 33] {
            assert_eq!(u16::from(RecordType::from(value)), value);
        }
        assert_eq!(RecordType::from(16), RecordType::Other(16));
    }
}
