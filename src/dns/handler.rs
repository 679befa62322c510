//! DNS Request Handler
//!
//! Turns one raw query into one raw response: decodes the packet, maps the
//! query name onto a realm and result count, samples the network view and
//! encodes the answer. Transport concerns live in `server.rs`.
//!
//! ## Query names
//!
//! `<conditions>.<root domain>` where each condition label is a BOLT-10 style
//! key letter followed by a decimal value:
//!
//! - `r<N>`: realm N (default: the first served realm)
//! - `n<N>`: number of nodes wanted (clamped to the configured maximum)
//! - `a<N>`: address-type bitfield, 2 = IPv4, 4 = IPv6
//!
//! BOLT-10 clients look the seed up as the SRV owner `_nodes._tcp.<root>`.
//! That service prefix may sit directly above the root domain and carries no
//! conditions. SRV itself is not answered, so such a query gets an empty
//! NOERROR while A, AAAA and ANY below the prefix are served as usual.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::message::{
    Query, RData, RecordType, Response, ResponseCode, CLASS_ANY, CLASS_IN, DNS_MAX_TCP_SIZE,
    DNS_MAX_UDP_SIZE,
};
use crate::api::Metrics;
use crate::types::{AddressFamily, NodeRecord, Realm};
use crate::view::NetworkView;

/// Transport a query arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// Why a query name does not map onto anything this seed serves
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("name is outside the seed zone")]
    OutsideZone,

    #[error("unsupported condition label {0:?}")]
    UnknownCondition(String),

    #[error("condition {0:?} given more than once")]
    DuplicateCondition(char),

    #[error("realm {0} is not served")]
    UnservedRealm(u32),
}

/// What a query name asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedRequest {
    pub realm: Realm,

    /// Nodes to sample
    pub count: usize,

    /// BOLT-10 address-type bitfield, if the name carried one
    pub address_types: Option<u32>,
}

/// Per-request state, discarded once the response is sent
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub name: String,
    pub qtype: RecordType,
    pub request: Option<SeedRequest>,
    pub transport: Transport,

    /// Encoded response must not exceed this
    pub max_reply_size: usize,
}

/// Query-name routing and answer construction
pub struct SeedDnsHandler {
    view: Arc<NetworkView>,
    metrics: Arc<Metrics>,

    /// Lower-cased labels of the root domain
    root_labels: Vec<String>,

    /// Served realms, default first
    realms: Vec<Realm>,

    /// Upper bound on nodes per answer
    max_results: usize,

    /// TTL for answer records (seconds)
    ttl: u32,

    /// Largest UDP payload we advertise or accept
    max_udp_payload: u16,
}

impl SeedDnsHandler {
    pub fn new(
        view: Arc<NetworkView>,
        metrics: Arc<Metrics>,
        root_domain: &str,
        realms: Vec<Realm>,
        max_results: usize,
        ttl: u32,
        max_udp_payload: u16,
    ) -> Self {
        let root_labels = root_domain
            .trim_matches('.')
            .split('.')
            .filter(|l| !l.is_empty())
            .map(|l| l.to_ascii_lowercase())
            .collect();

        Self {
            view,
            metrics,
            root_labels,
            realms,
            max_results,
            ttl,
            max_udp_payload,
        }
    }

    /// Answer a raw query. `None` means the packet was malformed and must be
    /// dropped without a reply.
    pub async fn handle(&self, packet: &[u8], transport: Transport) -> Option<Vec<u8>> {
        let mut rng = StdRng::seed_from_u64(rand::random());
        self.handle_with_rng(packet, transport, &mut rng).await
    }

    /// [`handle`](Self::handle) with an explicit randomness source
    pub async fn handle_with_rng<R>(
        &self,
        packet: &[u8],
        transport: Transport,
        rng: &mut R,
    ) -> Option<Vec<u8>>
    where
        R: Rng + Send + ?Sized,
    {
        self.metrics.inc_dns_queries();

        let query = match Query::parse(packet) {
            Ok(query) => query,
            Err(e) => {
                debug!("Dropping malformed DNS packet ({} bytes): {}", packet.len(), e);
                self.metrics.inc_dns_dropped();
                return None;
            }
        };

        let max_reply_size = match transport {
            Transport::Udp => query
                .edns_udp_size
                .map(|size| (size as usize).min(self.max_udp_payload as usize))
                .unwrap_or(DNS_MAX_UDP_SIZE)
                .max(DNS_MAX_UDP_SIZE),
            Transport::Tcp => DNS_MAX_TCP_SIZE,
        };

        let ctx = QueryContext {
            name: query.question.name(),
            qtype: query.question.qtype,
            request: self.parse_name(&query.question.labels).ok(),
            transport,
            max_reply_size,
        };

        let (rcode, answers) = self.resolve(&query, &ctx, rng).await;

        let encoded = Response {
            query: &query,
            rcode,
            answers: &answers,
            ttl: self.ttl,
            max_size: ctx.max_reply_size,
            edns_udp_size: query.edns_udp_size.map(|_| self.max_udp_payload),
        }
        .encode();

        match rcode {
            ResponseCode::NxDomain => self.metrics.inc_dns_nxdomain(),
            ResponseCode::NotImp => self.metrics.inc_dns_notimp(),
            ResponseCode::NoError => {}
        }
        if encoded.truncated {
            self.metrics.inc_dns_truncated();
        }
        self.metrics.inc_dns_responses();

        debug!(
            "DNS {:?} {} {:?} via {:?}: {:?}, {} answers{}",
            ctx.qtype,
            ctx.name,
            ctx.request,
            ctx.transport,
            rcode,
            encoded.answer_count,
            if encoded.truncated { " (truncated)" } else { "" }
        );

        Some(encoded.bytes)
    }

    async fn resolve<R>(
        &self,
        query: &Query,
        ctx: &QueryContext,
        rng: &mut R,
    ) -> (ResponseCode, Vec<RData>)
    where
        R: Rng + Send + ?Sized,
    {
        if query.header.opcode() != 0 {
            return (ResponseCode::NotImp, Vec::new());
        }
        if query.question.qclass != CLASS_IN && query.question.qclass != CLASS_ANY {
            return (ResponseCode::NotImp, Vec::new());
        }

        let families: &[AddressFamily] = match ctx.qtype {
            RecordType::Axfr | RecordType::Ixfr => return (ResponseCode::NotImp, Vec::new()),
            RecordType::A => &[AddressFamily::Ipv4],
            RecordType::Aaaa => &[AddressFamily::Ipv6],
            RecordType::Any => &[AddressFamily::Ipv4, AddressFamily::Ipv6],
            RecordType::Opt | RecordType::Other(_) => &[],
        };

        let Some(request) = &ctx.request else {
            return (ResponseCode::NxDomain, Vec::new());
        };

        let families: Vec<AddressFamily> = families
            .iter()
            .copied()
            .filter(|f| request.address_types.map_or(true, |bits| bits & f.bolt10_bit() != 0))
            .collect();

        if families.is_empty() {
            return (ResponseCode::NoError, Vec::new());
        }

        let nodes = self
            .view
            .sample_matching(
                request.realm,
                request.count,
                |r: &NodeRecord| r.has_any_family(&families),
                rng,
            )
            .await;

        (ResponseCode::NoError, answers_for(&nodes, &families))
    }

    /// Map query-name labels onto a request
    pub fn parse_name(&self, labels: &[String]) -> Result<SeedRequest, NameError> {
        if labels.len() < self.root_labels.len()
            || labels[labels.len() - self.root_labels.len()..] != self.root_labels[..]
        {
            return Err(NameError::OutsideZone);
        }
        let mut conditions = &labels[..labels.len() - self.root_labels.len()];
        if let [rest @ .., service, proto] = conditions {
            if service == "_nodes" && proto == "_tcp" {
                conditions = rest;
            }
        }

        let mut realm = None;
        let mut count = None;
        let mut address_types = None;

        for label in conditions {
            let mut chars = label.chars();
            let key = chars.next().ok_or_else(|| NameError::UnknownCondition(label.clone()))?;
            let digits = chars.as_str();
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(NameError::UnknownCondition(label.clone()));
            }
            let value: u32 = digits
                .parse()
                .map_err(|_| NameError::UnknownCondition(label.clone()))?;

            let slot = match key {
                'r' => &mut realm,
                'n' => &mut count,
                'a' => &mut address_types,
                _ => return Err(NameError::UnknownCondition(label.clone())),
            };
            if slot.replace(value).is_some() {
                return Err(NameError::DuplicateCondition(key));
            }
        }

        let realm = match realm {
            Some(r) => Realm::try_from(r)
                .ok()
                .filter(|r| self.realms.contains(r))
                .ok_or(NameError::UnservedRealm(r))?,
            None => *self.realms.first().ok_or(NameError::OutsideZone)?,
        };

        let count = count
            .map(|n| (n as usize).clamp(1, self.max_results))
            .unwrap_or(self.max_results);

        Ok(SeedRequest {
            realm,
            count,
            address_types,
        })
    }
}

/// One record per node and family: the node's first address of that family
fn answers_for(nodes: &[NodeRecord], families: &[AddressFamily]) -> Vec<RData> {
    let mut answers = Vec::with_capacity(nodes.len() * families.len());
    for &family in families {
        for node in nodes {
            match node.first_address(family).map(|a| a.ip) {
                Some(std::net::IpAddr::V4(ip)) => answers.push(RData::A(ip)),
                Some(std::net::IpAddr::V6(ip)) => answers.push(RData::Aaaa(ip)),
                None => {}
            }
        }
    }
    answers
}
