use std::fmt;
use std::net::IpAddr;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;

use hickory_proto::op::{Message, MessageType};

use crate::error::ProbeError;

/// Length of the fixed DNS message header
pub const HEADER_LEN: usize = 12;

/// The Internet class code
pub const CLASS_IN: u16 = 1;

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;

/// DNS record types the probe can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
	A,
	PTR,
	TXT,
	CNAME,
}

impl QueryType {
	/// The 16-bit TYPE code placed in the question section
	pub fn code(self) -> u16 {
		match self {
			QueryType::A => 1,
			QueryType::CNAME => 5,
			QueryType::PTR => 12,
			QueryType::TXT => 16,
		}
	}
}

impl FromStr for QueryType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"a" => Ok(QueryType::A),
			"ptr" => Ok(QueryType::PTR),
			"txt" => Ok(QueryType::TXT),
			"cname" => Ok(QueryType::CNAME),
			_ => Err(format!("unsupported record type '{}' (expected a, ptr, txt or cname)", s)),
		}
	}
}

impl fmt::Display for QueryType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			QueryType::A => "A",
			QueryType::PTR => "PTR",
			QueryType::TXT => "TXT",
			QueryType::CNAME => "CNAME",
		};
		f.write_str(name)
	}
}

/// Header fields of a DNS message.
///
/// The question count is not stored here: it is always taken from the
/// number of questions actually encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
	pub id: u16,
	pub response: bool,
	/// 4 bits
	pub opcode: u8,
	pub authoritative: bool,
	pub truncated: bool,
	pub recursion_desired: bool,
	pub recursion_available: bool,
	/// 3 reserved bits
	pub z: u8,
	/// 4 bits
	pub rcode: u8,
	pub answer_count: u16,
	pub authority_count: u16,
	pub additional_count: u16,
}

/// A single entry of the question section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
	pub name: String,
	pub qtype: u16,
	pub qclass: u16,
}

impl Question {
	/// Build an Internet-class question for `name`.
	pub fn new(name: impl Into<String>, query_type: QueryType) -> Self {
		Question {
			name: name.into(),
			qtype: query_type.code(),
			qclass: CLASS_IN,
		}
	}

	fn write_to(&self, buf: &mut Vec<u8>) -> Result<(), ProbeError> {
		// A single trailing dot marks a fully-qualified name, not an empty label
		let name = self.name.strip_suffix('.').unwrap_or(&self.name);
		if name.is_empty() {
			return Err(ProbeError::Encoding("domain name is empty".to_string()));
		}

		let start = buf.len();
		for label in name.split('.') {
			if label.is_empty() {
				return Err(ProbeError::Encoding(format!(
					"empty label in domain name '{}'", self.name
				)));
			}
			if label.len() > MAX_LABEL_LEN {
				return Err(ProbeError::Encoding(format!(
					"label '{}' is {} bytes, the limit is {}",
					label, label.len(), MAX_LABEL_LEN,
				)));
			}
			if !label.is_ascii() {
				return Err(ProbeError::Encoding(format!(
					"label '{}' is not ASCII", label
				)));
			}
			buf.push(label.len() as u8);
			buf.extend_from_slice(label.as_bytes());
		}
		buf.push(0);

		let name_len = buf.len() - start;
		if name_len > MAX_NAME_LEN {
			return Err(ProbeError::Encoding(format!(
				"domain name '{}' encodes to {} bytes, the limit is {}",
				self.name, name_len, MAX_NAME_LEN,
			)));
		}

		buf.extend_from_slice(&self.qtype.to_be_bytes());
		buf.extend_from_slice(&self.qclass.to_be_bytes());
		Ok(())
	}
}

/// A DNS query: header plus question section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
	pub header: Header,
	pub questions: Vec<Question>,
}

impl Query {
	/// Build a standard recursive query with a single question.
	pub fn new(id: u16, question: Question) -> Self {
		Query {
			header: Header {
				id,
				recursion_desired: true,
				..Header::default()
			},
			questions: vec![question],
		}
	}

	/// Serialize the query into RFC 1035 wire format.
	///
	/// Encoding is deterministic, so the result can be built once and sent
	/// unchanged on every probe iteration.
	pub fn encode(&self) -> Result<EncodedMessage, ProbeError> {
		let h = &self.header;
		if h.opcode > 0x0f {
			return Err(ProbeError::Encoding(format!("opcode {} does not fit in 4 bits", h.opcode)));
		}
		if h.z > 0x07 {
			return Err(ProbeError::Encoding(format!("reserved bits {} do not fit in 3 bits", h.z)));
		}
		if h.rcode > 0x0f {
			return Err(ProbeError::Encoding(format!("response code {} does not fit in 4 bits", h.rcode)));
		}
		let question_count = u16::try_from(self.questions.len())
			.map_err(|_| ProbeError::Encoding(format!("{} questions do not fit in a message", self.questions.len())))?;

		let capacity = HEADER_LEN + self.questions.iter()
			.map(|q| q.name.len() + 6)
			.sum::<usize>();
		let mut buf = Vec::with_capacity(capacity);

		buf.extend_from_slice(&h.id.to_be_bytes());
		buf.push(
			bit(h.response) << 7
				| h.opcode << 3
				| bit(h.authoritative) << 2
				| bit(h.truncated) << 1
				| bit(h.recursion_desired),
		);
		buf.push(bit(h.recursion_available) << 7 | h.z << 4 | h.rcode);
		for count in [question_count, h.answer_count, h.authority_count, h.additional_count] {
			buf.extend_from_slice(&count.to_be_bytes());
		}

		for question in &self.questions {
			question.write_to(&mut buf)?;
		}

		Ok(EncodedMessage::from(buf))
	}
}

fn bit(flag: bool) -> u8 {
	u8::from(flag)
}

/// Serialized query bytes, shared read-only between probe workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage(Arc<[u8]>);

impl EncodedMessage {
	/// Transaction ID from the first two header bytes
	pub fn id(&self) -> u16 {
		match self.0.get(..2) {
			Some(&[hi, lo]) => u16::from_be_bytes([hi, lo]),
			_ => 0,
		}
	}
}

impl From<Vec<u8>> for EncodedMessage {
	fn from(bytes: Vec<u8>) -> Self {
		EncodedMessage(bytes.into())
	}
}

impl Deref for EncodedMessage {
	type Target = [u8];

	fn deref(&self) -> &[u8] {
		&self.0
	}
}

/// Name to put in the question for `domain`.
///
/// PTR lookups accept a plain IP address and are rewritten to the matching
/// reverse-mapping name; everything else is used as given.
pub fn query_name(domain: &str, query_type: QueryType) -> String {
	if query_type == QueryType::PTR {
		if let Ok(ip) = domain.parse::<IpAddr>() {
			return reverse_name(ip);
		}
	}
	domain.to_string()
}

/// The in-addr.arpa / ip6.arpa name for an address.
pub fn reverse_name(ip: IpAddr) -> String {
	match ip {
		IpAddr::V4(v4) => {
			let [a, b, c, d] = v4.octets();
			format!("{}.{}.{}.{}.in-addr.arpa", d, c, b, a)
		}
		IpAddr::V6(v6) => {
			let mut name = String::with_capacity(72);
			for byte in v6.octets().iter().rev() {
				name.push_str(&format!("{:x}.{:x}.", byte & 0x0f, byte >> 4));
			}
			name.push_str("ip6.arpa");
			name
		}
	}
}

/// How much of a reply must be checked before a round trip counts.
///
/// `None` accepts any reply at least one header long. `Header` parses the
/// reply and requires a response carrying the query's transaction ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyCheck {
	#[default]
	None,
	Header,
}

impl ReplyCheck {
	/// Returns the reason a reply is rejected, if it is.
	pub fn verify(self, reply: &[u8], expected_id: u16) -> Result<(), String> {
		match self {
			ReplyCheck::None => Ok(()),
			ReplyCheck::Header => {
				let message = Message::from_vec(reply)
					.map_err(|e| format!("failed to parse DNS reply: {}", e))?;
				if message.id() != expected_id {
					return Err(format!(
						"txid mismatch: expected {}, got {}",
						expected_id, message.id()
					));
				}
				if message.message_type() != MessageType::Response {
					return Err("received a query instead of a response".to_string());
				}
				Ok(())
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use hickory_proto::op::OpCode;
	use hickory_proto::rr::{DNSClass, RecordType};

	fn example_query(id: u16, query_type: QueryType) -> Query {
		Query::new(id, Question::new("example.com", query_type))
	}

	#[test]
	fn test_encoded_length_and_id() {
		let bytes = example_query(1234, QueryType::A).encode().unwrap();
		// 12 header + (7+1) + (3+1) + 1 terminator + 4 type/class
		assert_eq!(bytes.len(), 29);
		assert_eq!(bytes[0], (1234 >> 8) as u8);
		assert_eq!(bytes[1], (1234 & 0xff) as u8);
		assert_eq!(bytes.id(), 1234);
	}

	#[test]
	fn test_question_layout() {
		let bytes = example_query(0xAAAA, QueryType::A).encode().unwrap();
		let mut expected = vec![7];
		expected.extend_from_slice(b"example");
		expected.push(3);
		expected.extend_from_slice(b"com");
		expected.extend_from_slice(&[0, 0, 1, 0, 1]);
		assert_eq!(&bytes[HEADER_LEN..], expected.as_slice());
	}

	#[test]
	fn test_default_flags_set_only_rd() {
		let bytes = example_query(1, QueryType::A).encode().unwrap();
		assert_eq!(bytes[2], 0x01);
		assert_eq!(bytes[3], 0x00);
		assert_eq!(&bytes[4..12], &[0, 1, 0, 0, 0, 0, 0, 0]);
	}

	#[test]
	fn test_flag_packing() {
		let mut query = example_query(1, QueryType::A);
		query.header = Header {
			id: 1,
			response: true,
			opcode: 2,
			authoritative: true,
			truncated: true,
			recursion_desired: true,
			recursion_available: true,
			z: 5,
			rcode: 3,
			answer_count: 0,
			authority_count: 0,
			additional_count: 0,
		};
		let bytes = query.encode().unwrap();
		assert_eq!(bytes[2], 0b1001_0111);
		assert_eq!(bytes[3], 0b1101_0011);
	}

	#[test]
	fn test_question_count_is_derived() {
		let mut query = example_query(1, QueryType::A);
		query.questions.push(Question::new("example.org", QueryType::TXT));
		query.header.answer_count = 3;
		query.header.additional_count = 0x0102;
		let bytes = query.encode().unwrap();
		assert_eq!(&bytes[4..6], &[0, 2]);
		assert_eq!(&bytes[6..8], &[0, 3]);
		assert_eq!(&bytes[8..10], &[0, 0]);
		assert_eq!(&bytes[10..12], &[1, 2]);
	}

	#[test]
	fn test_encoding_is_deterministic() {
		let query = example_query(77, QueryType::CNAME);
		assert_eq!(query.encode().unwrap(), query.encode().unwrap());
	}

	#[test]
	fn test_trailing_dot_is_ignored() {
		let plain = example_query(5, QueryType::A).encode().unwrap();
		let fqdn = Query::new(5, Question::new("example.com.", QueryType::A)).encode().unwrap();
		assert_eq!(plain, fqdn);
	}

	#[test]
	fn test_label_length_limit() {
		let ok = format!("{}.com", "a".repeat(63));
		assert!(Query::new(1, Question::new(ok, QueryType::A)).encode().is_ok());

		let too_long = format!("{}.com", "a".repeat(64));
		let err = Query::new(1, Question::new(too_long, QueryType::A)).encode().unwrap_err();
		assert!(matches!(err, ProbeError::Encoding(_)));
		assert!(err.to_string().contains("64 bytes"));
	}

	#[test]
	fn test_name_length_limit() {
		let label = "a".repeat(63);
		let name = [label.as_str(); 4].join(".");
		// 4 * 64 + 1 = 257 bytes on the wire
		let err = Query::new(1, Question::new(name, QueryType::A)).encode().unwrap_err();
		assert!(err.to_string().contains("limit is 255"));
	}

	#[test]
	fn test_malformed_names_rejected() {
		for name in ["", ".", "a..b", ".example.com", "bücher.de"] {
			let result = Query::new(1, Question::new(name, QueryType::A)).encode();
			assert!(matches!(result, Err(ProbeError::Encoding(_))), "accepted '{}'", name);
		}
	}

	#[test]
	fn test_out_of_range_header_fields_rejected() {
		let mut query = example_query(1, QueryType::A);
		query.header.opcode = 16;
		assert!(query.encode().is_err());

		let mut query = example_query(1, QueryType::A);
		query.header.z = 8;
		assert!(query.encode().is_err());

		let mut query = example_query(1, QueryType::A);
		query.header.rcode = 16;
		assert!(query.encode().is_err());
	}

	#[test]
	fn test_hickory_decodes_encoded_query() {
		let bytes = example_query(4321, QueryType::TXT).encode().unwrap();
		let message = Message::from_vec(&bytes).unwrap();
		assert_eq!(message.id(), 4321);
		assert_eq!(message.message_type(), MessageType::Query);
		assert_eq!(message.op_code(), OpCode::Query);
		assert!(message.recursion_desired());
		assert_eq!(message.queries().len(), 1);

		let query = &message.queries()[0];
		assert_eq!(query.name().to_string(), "example.com.");
		assert_eq!(query.query_type(), RecordType::TXT);
		assert_eq!(query.query_class(), DNSClass::IN);
	}

	#[test]
	fn test_query_type_codes() {
		assert_eq!(QueryType::A.code(), 1);
		assert_eq!(QueryType::CNAME.code(), 5);
		assert_eq!(QueryType::PTR.code(), 12);
		assert_eq!(QueryType::TXT.code(), 16);
	}

	#[test]
	fn test_query_type_parse() {
		assert_eq!("a".parse::<QueryType>(), Ok(QueryType::A));
		assert_eq!("PTR".parse::<QueryType>(), Ok(QueryType::PTR));
		assert_eq!("Txt".parse::<QueryType>(), Ok(QueryType::TXT));
		assert_eq!("cname".parse::<QueryType>(), Ok(QueryType::CNAME));
		assert!("mx".parse::<QueryType>().is_err());
	}

	#[test]
	fn test_reverse_name_v4() {
		let ip: IpAddr = "192.0.2.1".parse().unwrap();
		assert_eq!(reverse_name(ip), "1.2.0.192.in-addr.arpa");
	}

	#[test]
	fn test_reverse_name_v6() {
		let ip: IpAddr = "2001:db8::1".parse().unwrap();
		let expected = format!("1.{}8.b.d.0.1.0.0.2.ip6.arpa", "0.".repeat(23));
		assert_eq!(reverse_name(ip), expected);
	}

	#[test]
	fn test_query_name_only_rewrites_ptr_addresses() {
		assert_eq!(query_name("8.8.4.4", QueryType::PTR), "4.4.8.8.in-addr.arpa");
		assert_eq!(query_name("8.8.4.4", QueryType::A), "8.8.4.4");
		assert_eq!(
			query_name("4.4.8.8.in-addr.arpa", QueryType::PTR),
			"4.4.8.8.in-addr.arpa"
		);
	}

	#[test]
	fn test_reply_check_none_accepts_anything() {
		assert!(ReplyCheck::None.verify(&[0u8; 12], 99).is_ok());
	}

	#[test]
	fn test_reply_check_header() {
		let mut reply = example_query(9999, QueryType::A);
		reply.header.response = true;
		let bytes = reply.encode().unwrap();

		assert!(ReplyCheck::Header.verify(&bytes, 9999).is_ok());
		let err = ReplyCheck::Header.verify(&bytes, 1111).unwrap_err();
		assert!(err.contains("txid mismatch"));

		let query = example_query(9999, QueryType::A).encode().unwrap();
		assert!(ReplyCheck::Header.verify(&query, 9999).is_err());

		assert!(ReplyCheck::Header.verify(&[0u8; 5], 0).is_err());
	}
}
