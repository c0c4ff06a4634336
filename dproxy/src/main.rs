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

mod parser;

use self::parser::{Parsed, UpstreamConf};
use anyhow::Result;
use dforward::{
    cache::TtlBounds,
    upstreams::{Tcp, Udp, Upstream},
    Proxy, Resolver, ResolverConfig, RouteTable,
};
use log::*;
use simple_logger::SimpleLogger;
use std::{num::NonZeroUsize, path::PathBuf, sync::Arc, time::Duration};
use structopt::StructOpt;
use tokio::{fs::File, io::AsyncReadExt};

#[derive(StructOpt)]
#[structopt(
    name = "dproxy",
    about = "Multi-protocol DNS forwarding proxy with per-domain routing and subnet-aware caching."
)]
struct Args {
    /// Path to the YAML configuration file. A built-in configuration is used
    /// when omitted.
    #[structopt(short, long)]
    config: Option<PathBuf>,
}

fn build_upstream(conf: &UpstreamConf) -> Arc<dyn Upstream> {
    match conf {
        UpstreamConf::Udp(addr) => Arc::new(Udp::new(*addr)),
        UpstreamConf::Tcp(addr) => Arc::new(Tcp::new(*addr)),
    }
}

fn init(p: Parsed) -> Result<(Proxy, LevelFilter)> {
    let mut table = RouteTable::new(p.upstreams.iter().map(build_upstream).collect());
    for block in &p.reserved {
        for domain in &block.domains {
            if block.unresolvable {
                table.set_unresolvable(domain);
            } else {
                table.add_reserved(domain, block.upstreams.iter().map(build_upstream).collect());
            }
        }
    }

    let config = ResolverConfig {
        enable_ecs: p.enable_ecs,
        refuse_any: p.refuse_any,
        trust_forwarded: p.trust_forwarded,
        cache_size: if p.cache.enabled {
            NonZeroUsize::new(p.cache.size)
        } else {
            None
        },
        ttl_bounds: TtlBounds {
            min_ttl: p.cache.min_ttl,
            max_ttl: p.cache.max_ttl,
        },
        timeout: Duration::from_secs(p.timeout),
    };
    let resolver = Resolver::new(
        table,
        p.fallbacks.iter().map(build_upstream).collect(),
        config,
    );

    Ok((Proxy::new(resolver, p.address), p.verbosity))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::from_args();

    let parsed: Parsed = match &args.config {
        Some(path) => {
            let mut file = File::open(path).await?;
            let mut config = String::new();
            file.read_to_string(&mut config).await?;
            serde_yaml::from_str(&config)?
        }
        None => serde_yaml::from_str(include_str!("../configs/default.yaml"))?,
    };

    let (proxy, verbosity) = init(parsed)?;

    SimpleLogger::new().with_level(verbosity).init()?;

    proxy.start().await?;
    info!("dproxy ready!");

    tokio::signal::ctrl_c().await?;
    info!("shutting down on interrupt");
    proxy.stop().await?;

    Ok(())
}
