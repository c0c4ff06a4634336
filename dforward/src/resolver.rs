// Copyright 2024 LEXUGE
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! The request-resolution pipeline: policy gate, cache lookup, routing
//! decision, upstream dispatch, ECS reconciliation, cache insert and response
//! shaping. The resolver turns every terminal failure into a DNS response;
//! a transport-level error never reaches the listener for a decodable query.

use crate::{
    cache::{RespCache, SubnetCache, TtlBounds},
    context::RequestContext,
    ecs,
    error::Result,
    message,
    table::RouteTable,
    upstreams::{Upstream, Upstreams},
};
use bytes::Bytes;
use domain::base::{iana::Rcode, iana::Rtype, Message};
use log::{info, warn};
use std::{num::NonZeroUsize, sync::Arc, time::Duration};

/// Tunables of the resolution pipeline.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Attach ECS to outgoing queries of public clients and partition their
    /// cache entries by subnet.
    pub enable_ecs: bool,
    /// Refuse ANY queries with `NotImp` without contacting upstreams.
    pub refuse_any: bool,
    /// Trust the `X-Forwarded-For` chain on HTTPS listeners. Off by default:
    /// every intermediary can forge the header.
    pub trust_forwarded: bool,
    /// LRU capacity of each cache tier; `None` disables caching entirely.
    pub cache_size: Option<NonZeroUsize>,
    /// TTL clamping bounds applied on cache inserts.
    pub ttl_bounds: TtlBounds,
    /// Per-upstream exchange timeout.
    pub timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            enable_ecs: false,
            refuse_any: false,
            trust_forwarded: false,
            cache_size: NonZeroUsize::new(4096),
            ttl_bounds: TtlBounds::default(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// The request-resolution engine, shared by every listener.
pub struct Resolver {
    table: RouteTable,
    fallbacks: Vec<Arc<dyn Upstream>>,
    dispatcher: Upstreams,
    cache: Option<(RespCache, SubnetCache)>,
    config: ResolverConfig,
}

impl Resolver {
    /// Create a resolver from the routing table, the fallback pool and the
    /// pipeline configuration.
    pub fn new(
        table: RouteTable,
        fallbacks: Vec<Arc<dyn Upstream>>,
        config: ResolverConfig,
    ) -> Self {
        let cache = config.cache_size.map(|size| {
            (
                RespCache::new(size, config.ttl_bounds),
                SubnetCache::new(size, config.ttl_bounds),
            )
        });
        Self {
            table,
            fallbacks,
            dispatcher: Upstreams::new(config.timeout),
            cache,
            config,
        }
    }

    /// Resolve a request into a DNS response. Terminal failures become a
    /// `SERVFAIL` response with the query's id; the query's id is preserved
    /// on every path.
    pub async fn resolve(&self, ctx: &RequestContext) -> Result<Message<Bytes>> {
        match self.try_resolve(ctx).await {
            Ok(m) => Ok(m),
            Err(e) => {
                // Catch all server failure here and return server fail
                warn!(
                    "query #{} encountered error: {}, returning SERVFAIL",
                    ctx.id(),
                    e
                );
                message::respond(&ctx.query, Rcode::ServFail)
            }
        }
    }

    async fn try_resolve(&self, ctx: &RequestContext) -> Result<Message<Bytes>> {
        // Policy gate. `sole_question` also rejects the zero-question case.
        let question = match ctx.query.sole_question() {
            Ok(q) => q,
            Err(e) => {
                warn!("query #{} malformed: {}", ctx.id(), e);
                return message::respond(&ctx.query, Rcode::ServFail);
            }
        };
        if ctx.query.additional().is_err() {
            warn!("query #{} has a malformed additional section", ctx.id());
            return message::respond(&ctx.query, Rcode::ServFail);
        }
        if self.config.refuse_any && question.qtype() == Rtype::Any {
            info!("query #{} asks for ANY, refusing by policy", ctx.id());
            return message::respond(&ctx.query, Rcode::NotImp);
        }

        // Effective client network.
        let client_ip = ctx.client_ip(self.config.trust_forwarded);
        let use_subnet = self.config.enable_ecs && ecs::is_global(client_ip);

        // Cache lookup. A subnet-cache miss never falls through to the
        // general tier.
        if let Some((general, subnet)) = &self.cache {
            let hit = if use_subnet {
                subnet.get(&ctx.query, client_ip).map(|(m, _)| m)
            } else {
                general.get(&ctx.query)
            };
            if let Some(m) = hit {
                return Ok(m);
            }
        }

        // Routing decision.
        let qname = question.qname().to_string();
        let (upstreams, resolvable) = self.table.upstreams_for(&qname);
        if !resolvable {
            info!(
                "query #{} for {} is unresolvable by policy, answering empty",
                ctx.id(),
                qname
            );
            return message::respond(&ctx.query, Rcode::NoError);
        }

        // ECS attach on a cloned outgoing query.
        let (outgoing, sent_mask) = if use_subnet {
            let (m, mask) = ecs::attach_subnet(&ctx.query, client_ip)?;
            (m, Some(mask))
        } else {
            (ctx.query.clone(), None)
        };

        // Dispatch.
        let mut reply = self
            .dispatcher
            .exchange(&outgoing, &upstreams, &self.fallbacks)
            .await?;

        // ECS reconcile: note the scope the upstream declared, then drop the
        // option unless the client itself sent one.
        let scope = ecs::parse_subnet(&reply).map(|(_, _, scope)| scope);
        if scope.is_some() && ecs::parse_subnet(&ctx.query).is_none() {
            reply = ecs::strip_subnet(&reply)?;
        }

        // Cache insert. Subnet entries are keyed under the declared scope so
        // that an aggregated answer serves every client it is valid for; a
        // reply without ECS is keyed under the mask we sent.
        if let Some((general, subnet)) = &self.cache {
            if let Some(sent) = sent_mask {
                subnet.put(&reply, client_ip, scope.unwrap_or(sent));
            } else {
                general.put(&reply);
            }
        }

        // Response shaping: the client's id always wins.
        message::with_id(&reply, ctx.query.header().id())
    }
}
