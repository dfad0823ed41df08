//! Wires a `StarGroup` over TCP from a rank, a world size and the hub's address.

use std::time::Duration;

use log::{info, warn};
use tokio::net::{
    TcpListener, TcpStream, ToSocketAddrs,
    tcp::{OwnedReadHalf, OwnedWriteHalf},
};

use crate::{
    error::{CollectiveErr, Result},
    group::{Link, StarGroup, runtime},
    msg::{Command, Msg},
};

const CONNECT_RETRIES: usize = 50;
const CONNECT_BACKOFF: Duration = Duration::from_millis(200);

/// A process group whose members are connected over TCP.
pub type TcpGroup = StarGroup<OwnedReadHalf, OwnedWriteHalf>;

type TcpLink = Link<OwnedReadHalf, OwnedWriteHalf>;

/// Joins the process group.
///
/// Rank 0 listens at `addr` and waits for the other `world_size - 1` ranks, every other rank
/// connects to it. Blocks until the whole group is formed.
///
/// # Arguments
/// * `rank` - The rank of this process.
/// * `world_size` - The amount of processes in the group.
/// * `addr` - The address of rank 0.
///
/// # Returns
/// The connected group, or an error if the group couldn't be formed or its members disagree on
/// the world size.
pub fn connect<A>(rank: usize, world_size: usize, addr: A) -> Result<TcpGroup>
where
    A: ToSocketAddrs + Clone,
{
    if rank >= world_size {
        return Err(CollectiveErr::InvalidRank { rank, world_size });
    }

    let rt = runtime()?;
    let links = rt.block_on(async {
        match rank {
            0 => accept_peers(world_size, addr).await,
            _ => join_hub(rank, world_size, addr).await,
        }
    })?;

    info!(rank = rank, world_size = world_size; "process group formed");
    StarGroup::new(rank, world_size, links, rt)
}

async fn accept_peers<A: ToSocketAddrs>(world_size: usize, addr: A) -> Result<Vec<TcpLink>> {
    let mut slots: Vec<Option<TcpLink>> = (1..world_size).map(|_| None).collect();
    if slots.is_empty() {
        return Ok(Vec::new());
    }

    let listener = TcpListener::bind(addr).await?;
    info!("waiting for {} peers at {}", world_size - 1, listener.local_addr()?);

    let mut rx_buf: Vec<u32> = Vec::new();
    let mut joined = 0;

    while joined < slots.len() {
        let (stream, peer_addr) = listener.accept().await?;
        let (rx, tx) = stream.into_split();
        let mut link = Link::new(rx, tx);

        let msg: Msg = link.rx.recv_into(&mut rx_buf).await?;
        let Msg::Control(Command::Hello {
            rank,
            world_size: peer_world,
        }) = msg
        else {
            return Err(CollectiveErr::UnexpectedMessage {
                rank: 0,
                got: msg.kind(),
            });
        };

        if peer_world != world_size {
            return Err(CollectiveErr::WorldSizeMismatch {
                got: peer_world,
                expected: world_size,
            });
        }

        if rank == 0 || rank >= world_size {
            return Err(CollectiveErr::InvalidRank { rank, world_size });
        }

        let slot = &mut slots[rank - 1];
        if slot.is_some() {
            return Err(CollectiveErr::DuplicateRank(rank));
        }

        info!(rank = rank; "peer joined from {peer_addr}");
        *slot = Some(link);
        joined += 1;
    }

    let welcome = Msg::Control(Command::Hello {
        rank: 0,
        world_size,
    });

    let mut links = Vec::with_capacity(slots.len());
    for mut link in slots.into_iter().flatten() {
        link.tx.send(&welcome).await?;
        links.push(link);
    }

    Ok(links)
}

async fn join_hub<A>(rank: usize, world_size: usize, addr: A) -> Result<Vec<TcpLink>>
where
    A: ToSocketAddrs + Clone,
{
    let stream = connect_with_retries(addr).await?;
    let (rx, tx) = stream.into_split();
    let mut link = Link::new(rx, tx);

    let hello = Msg::Control(Command::Hello { rank, world_size });
    link.tx.send(&hello).await?;

    let mut rx_buf: Vec<u32> = Vec::new();
    let msg: Msg = link.rx.recv_into(&mut rx_buf).await?;

    match msg {
        Msg::Control(Command::Hello {
            world_size: hub_world,
            ..
        }) if hub_world == world_size => {}
        Msg::Control(Command::Hello {
            world_size: hub_world,
            ..
        }) => {
            return Err(CollectiveErr::WorldSizeMismatch {
                got: hub_world,
                expected: world_size,
            });
        }
        Msg::Err(detail) => return Err(CollectiveErr::Aborted(detail.into_owned())),
        other => {
            return Err(CollectiveErr::UnexpectedMessage {
                rank: 0,
                got: other.kind(),
            });
        }
    }

    Ok(vec![link])
}

async fn connect_with_retries<A>(addr: A) -> Result<TcpStream>
where
    A: ToSocketAddrs + Clone,
{
    let mut attempt = 1;

    loop {
        match TcpStream::connect(addr.clone()).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < CONNECT_RETRIES => {
                warn!("hub not reachable yet (attempt {attempt}/{CONNECT_RETRIES}): {e}");
                attempt += 1;
                tokio::time::sleep(CONNECT_BACKOFF).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
