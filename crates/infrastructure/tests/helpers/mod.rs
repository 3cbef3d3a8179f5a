#![allow(dead_code)]

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use veil_dns_domain::DomainError;
use veil_dns_infrastructure::dns::transport::{Dialer, Exchange};
use veil_dns_infrastructure::dns::UpstreamPool;

pub fn question(name: &str, record_type: RecordType) -> Message {
    let mut query = Message::new();
    query.set_id(fastrand::u16(..));
    query.set_message_type(MessageType::Query);
    query.set_op_code(OpCode::Query);
    query.set_recursion_desired(true);
    let mut q = Query::new();
    q.set_name(Name::from_str(name).unwrap());
    q.set_query_type(record_type);
    q.set_query_class(DNSClass::IN);
    query.add_query(q);
    query
}

pub fn a_answer(query: &Message, ip: Ipv4Addr, ttl: u32) -> Message {
    let mut response = rcode_reply(query, ResponseCode::NoError);
    let name = query
        .queries()
        .first()
        .map(|q| q.name().clone())
        .unwrap_or_else(Name::root);
    response.add_answer(Record::from_rdata(name, ttl, RData::A(A(ip))));
    response
}

pub fn rcode_reply(query: &Message, rcode: ResponseCode) -> Message {
    let mut response = Message::new();
    response.set_id(query.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(OpCode::Query);
    response.set_recursion_desired(true);
    response.set_recursion_available(true);
    response.set_response_code(rcode);
    response.add_queries(query.queries().to_vec());
    response
}

pub fn answer_ips(message: &Message) -> Vec<Ipv4Addr> {
    message
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::A(a)) => Some(a.0),
            _ => None,
        })
        .collect()
}

pub fn answer_ttls(message: &Message) -> Vec<u32> {
    message.answers().iter().map(|record| record.ttl()).collect()
}

/// Scripted upstream behavior for engine tests.
pub enum MockReply {
    Answer(Message),
    Rcode(ResponseCode),
    Fail,
}

pub struct MockUpstream {
    pub reply: MockReply,
    pub delay: Duration,
    pub dials: AtomicUsize,
    pub exchanges: AtomicUsize,
}

impl MockUpstream {
    pub fn new(reply: MockReply, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply,
            delay,
            dials: AtomicUsize::new(0),
            exchanges: AtomicUsize::new(0),
        })
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

pub struct MockDialer(pub Arc<MockUpstream>);

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self) -> Result<Box<dyn Exchange>, DomainError> {
        self.0.dials.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConn(Arc::clone(&self.0))))
    }

    fn endpoint(&self) -> String {
        "mock:853".to_string()
    }
}

struct MockConn(Arc<MockUpstream>);

#[async_trait]
impl Exchange for MockConn {
    async fn exchange(&mut self, query: &[u8], _timeout: Duration) -> Result<Vec<u8>, DomainError> {
        self.0.exchanges.fetch_add(1, Ordering::SeqCst);
        if !self.0.delay.is_zero() {
            tokio::time::sleep(self.0.delay).await;
        }
        let query = Message::from_vec(query)
            .map_err(|e| DomainError::InvalidDnsMessage(e.to_string()))?;
        match &self.0.reply {
            MockReply::Answer(message) => {
                let mut response = message.clone();
                response.set_id(query.id());
                Ok(response.to_vec().unwrap())
            }
            MockReply::Rcode(rcode) => Ok(rcode_reply(&query, *rcode).to_vec().unwrap()),
            MockReply::Fail => Err(DomainError::IoError("mock upstream failure".to_string())),
        }
    }
}

pub fn mock_pool(upstream: &Arc<MockUpstream>) -> Arc<UpstreamPool> {
    Arc::new(UpstreamPool::new(2, Arc::new(MockDialer(Arc::clone(upstream)))))
}
