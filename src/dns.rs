//! DNS message helpers on top of `hickory-proto`.

use hickory_proto::op::{Message, MessageType};
use hickory_proto::rr::{DNSClass, Name, RecordType};

/// Cache identity of a query: name, record type and class.
///
/// The name is lower-cased on construction so that `Example.COM` and
/// `example.com` share a slot. Header fields never take part.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Question {
    name: Name,
    qtype: RecordType,
    qclass: DNSClass,
}

impl Question {
    pub fn new(name: &Name, qtype: RecordType, qclass: DNSClass) -> Self {
        Self {
            name: name.to_lowercase(),
            qtype,
            qclass,
        }
    }

    /// Build the question from the first question record of `message`.
    ///
    /// Returns `None` when the message carries no question.
    pub fn from_message(message: &Message) -> Option<Self> {
        message
            .queries()
            .first()
            .map(|q| Self::new(q.name(), q.query_type(), q.query_class()))
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn qtype(&self) -> RecordType {
        self.qtype
    }
}

/// Produce a reply to `request` from a cached answer.
///
/// The cached message is cloned, never modified. The copy takes the
/// request's transaction id, opcode, RD/CD bits and question section;
/// response code and record sections come from the cached answer.
pub fn stamp_reply(cached: &Message, request: &Message) -> Message {
    let mut reply = cached.clone();
    reply
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired())
        .set_checking_disabled(request.checking_disabled());
    reply.take_queries();
    reply.add_queries(request.queries().iter().cloned());
    reply
}
