//! A star shaped process group: rank 0 relays every collective.

use std::{borrow::Cow, io};

use log::debug;
use tokio::{
    io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf},
    runtime::{Builder, Runtime},
};

use crate::{
    Collective, OnoReceiver, OnoSender,
    error::{CollectiveErr, Result},
    msg::{Command, Msg, Op, Payload},
};

const HUB: usize = 0;
const DUPLEX_BUF_SIZE: usize = 64 * 1024;

/// Both ends of a framed connection to another member of the group.
pub struct Link<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub rx: OnoReceiver<R>,
    pub tx: OnoSender<W>,
}

impl<R, W> Link<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a new `Link` from both halves of a stream.
    pub fn new(rx: R, tx: W) -> Self {
        let (rx, tx) = crate::channel(rx, tx);
        Self { rx, tx }
    }
}

/// A process group in which every peer talks only to the hub (rank 0).
///
/// Each operation runs in two phases: every peer sends one message to the hub, then the hub
/// validates and combines them and answers every peer. The hub adds contributions in rank order,
/// so every participant receives bit-identical sums.
///
/// The group owns a single threaded runtime and blocks on it, so it must not be used from within
/// another async runtime.
pub struct StarGroup<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rt: Runtime,
    star: Star<R, W>,
}

/// A group running entirely in memory, one member per thread.
pub type MemoryGroup = StarGroup<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

impl<R, W> StarGroup<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a new `StarGroup`.
    ///
    /// # Arguments
    /// * `rank` - The rank of this participant.
    /// * `world_size` - The amount of participants.
    /// * `links` - On the hub, one link per peer ordered by rank. On a peer, the link to the hub.
    /// * `rt` - The runtime the links are bound to.
    ///
    /// # Returns
    /// An error if the amount of links doesn't match the rank's role.
    pub fn new(
        rank: usize,
        world_size: usize,
        links: Vec<Link<R, W>>,
        rt: Runtime,
    ) -> Result<Self> {
        if rank >= world_size {
            return Err(CollectiveErr::InvalidRank { rank, world_size });
        }

        let expected = match rank {
            HUB => world_size - 1,
            _ => 1,
        };

        if links.len() != expected {
            return Err(CollectiveErr::WorldSizeMismatch {
                got: links.len() + 1,
                expected: expected + 1,
            });
        }

        let star = Star {
            rank,
            world_size,
            links,
            rx_buf: Vec::new(),
        };

        Ok(Self { rt, star })
    }
}

impl<R, W> Collective for StarGroup<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    fn rank(&self) -> usize {
        self.star.rank
    }

    fn world_size(&self) -> usize {
        self.star.world_size
    }

    fn reduce_sum(&mut self, buf: &mut [f32]) -> Result<()> {
        if self.star.world_size == 1 {
            return Ok(());
        }

        let Self { rt, star } = self;
        rt.block_on(star.reduce_sum(buf))
    }

    fn broadcast(&mut self, buf: &mut [f32], src: usize) -> Result<()> {
        self.star.check_rank(src)?;
        if self.star.world_size == 1 {
            return Ok(());
        }

        let Self { rt, star } = self;
        rt.block_on(star.broadcast(buf, src))
    }

    fn scatter(&mut self, full: Option<&[f32]>, len: usize, src: usize) -> Result<Vec<f32>> {
        self.star.check_src(src, full.is_some())?;
        if self.star.world_size == 1 {
            let full = full.unwrap_or_default();
            if full.len() != len {
                return Err(CollectiveErr::ShapeMismatch {
                    op: Op::Scatter,
                    rank: src,
                    got: full.len(),
                    expected: len,
                });
            }

            return Ok(full.to_vec());
        }

        let Self { rt, star } = self;
        rt.block_on(star.scatter(full, len, src))
    }
}

/// Builds a fully connected in-memory group, one `MemoryGroup` per rank.
///
/// # Arguments
/// * `world_size` - The amount of participants.
///
/// # Returns
/// The members of the group indexed by rank, or an io error if a runtime couldn't be created.
pub fn in_memory(world_size: usize) -> Result<Vec<MemoryGroup>> {
    if world_size == 0 {
        return Err(CollectiveErr::WorldSizeMismatch {
            got: 0,
            expected: 1,
        });
    }

    let mut hub_links = Vec::with_capacity(world_size - 1);
    let mut peers = Vec::with_capacity(world_size - 1);

    for rank in 1..world_size {
        let (hub_end, peer_end) = tokio::io::duplex(DUPLEX_BUF_SIZE);

        let (rx, tx) = tokio::io::split(hub_end);
        hub_links.push(Link::new(rx, tx));

        let (rx, tx) = tokio::io::split(peer_end);
        peers.push((rank, Link::new(rx, tx)));
    }

    let mut groups = Vec::with_capacity(world_size);
    groups.push(StarGroup::new(HUB, world_size, hub_links, runtime()?)?);

    for (rank, link) in peers {
        groups.push(StarGroup::new(rank, world_size, vec![link], runtime()?)?);
    }

    Ok(groups)
}

/// Creates the single threaded runtime a group blocks on.
pub(crate) fn runtime() -> io::Result<Runtime> {
    Builder::new_current_thread().enable_all().build()
}

/// The async state of a `StarGroup`, kept apart from the runtime driving it.
struct Star<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rank: usize,
    world_size: usize,
    links: Vec<Link<R, W>>,
    rx_buf: Vec<u32>,
}

impl<R, W> Star<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    fn is_hub(&self) -> bool {
        self.rank == HUB
    }

    fn check_rank(&self, rank: usize) -> Result<()> {
        if rank >= self.world_size {
            return Err(CollectiveErr::InvalidRank {
                rank,
                world_size: self.world_size,
            });
        }

        Ok(())
    }

    /// Checks that `src` is a valid rank and that only `src` holds the data.
    fn check_src(&self, src: usize, has_data: bool) -> Result<()> {
        self.check_rank(src)?;

        if has_data != (self.rank == src) {
            return Err(CollectiveErr::SourceMismatch {
                rank: self.rank,
                src,
            });
        }

        Ok(())
    }

    async fn reduce_sum(&mut self, buf: &mut [f32]) -> Result<()> {
        debug!(rank = self.rank, len = buf.len(); "reduce_sum");

        if !self.is_hub() {
            self.links[0].tx.send(&Msg::Data(Payload::Reduce(buf))).await?;
            return self.recv_reply(Op::ReduceSum, buf).await;
        }

        let gathered = self.gather_reduce(buf).await;
        self.release(gathered, Op::ReduceSum, buf).await
    }

    async fn broadcast(&mut self, buf: &mut [f32], src: usize) -> Result<()> {
        debug!(rank = self.rank, src = src, len = buf.len(); "broadcast");

        if !self.is_hub() {
            if self.rank == src {
                self.links[0].tx.send(&Msg::Data(Payload::Broadcast(buf))).await?;
            } else {
                let ready = Msg::Control(Command::Ready {
                    op: Op::Broadcast,
                    len: buf.len(),
                });

                self.links[0].tx.send(&ready).await?;
            }

            return self.recv_reply(Op::Broadcast, buf).await;
        }

        let gathered = self.gather_broadcast(buf, src).await;
        self.release(gathered, Op::Broadcast, buf).await
    }

    async fn scatter(&mut self, full: Option<&[f32]>, len: usize, src: usize) -> Result<Vec<f32>> {
        debug!(rank = self.rank, src = src, len = len; "scatter");

        let mut shard = vec![0.0; len];

        if !self.is_hub() {
            let ready = Msg::Control(Command::Ready {
                op: Op::Scatter,
                len,
            });

            self.links[0].tx.send(&ready).await?;
            if let Some(full) = full {
                self.links[0].tx.send(&Msg::Data(Payload::Scatter(full))).await?;
            }

            self.recv_reply(Op::Scatter, &mut shard).await?;
            return Ok(shard);
        }

        match self.gather_scatter(full, len, src).await {
            Ok((full, lens)) => {
                let (own, mut rest) = full.split_at(len);
                shard.copy_from_slice(own);

                for (link, peer_len) in self.links.iter_mut().zip(&lens[1..]) {
                    let part;
                    (part, rest) = rest.split_at(*peer_len);
                    link.tx.send(&Msg::Data(Payload::Scatter(part))).await?;
                }

                Ok(shard)
            }
            Err(e) => {
                self.abort(&e).await;
                Err(e)
            }
        }
    }

    /// Adds every peer's contribution into `buf`, in rank order.
    async fn gather_reduce(&mut self, buf: &mut [f32]) -> Result<()> {
        for (i, link) in self.links.iter_mut().enumerate() {
            let rank = i + 1;

            let msg: Msg = link.rx.recv_into(&mut self.rx_buf).await?;
            match msg {
                Msg::Data(Payload::Reduce(nums)) => {
                    check_len(Op::ReduceSum, rank, nums.len(), buf.len())?;
                    buf.iter_mut().zip(nums).for_each(|(acc, x)| *acc += x);
                }
                other => return Err(unexpected(Op::ReduceSum, rank, &other)),
            }
        }

        Ok(())
    }

    /// Waits for every peer to enter the broadcast, copying the data of `src` into `buf`.
    async fn gather_broadcast(&mut self, buf: &mut [f32], src: usize) -> Result<()> {
        for (i, link) in self.links.iter_mut().enumerate() {
            let rank = i + 1;

            let msg: Msg = link.rx.recv_into(&mut self.rx_buf).await?;
            match msg {
                Msg::Data(Payload::Broadcast(nums)) if rank == src => {
                    check_len(Op::Broadcast, rank, nums.len(), buf.len())?;
                    buf.copy_from_slice(nums);
                }
                Msg::Control(Command::Ready {
                    op: Op::Broadcast,
                    len,
                }) if rank != src => check_len(Op::Broadcast, rank, len, buf.len())?,
                Msg::Data(Payload::Broadcast(_))
                | Msg::Control(Command::Ready {
                    op: Op::Broadcast, ..
                }) => return Err(CollectiveErr::SourceMismatch { rank, src }),
                other => return Err(unexpected(Op::Broadcast, rank, &other)),
            }
        }

        Ok(())
    }

    /// Collects every participant's shard length and the data to split.
    ///
    /// # Returns
    /// The full data and the shard lengths indexed by rank.
    async fn gather_scatter(
        &mut self,
        full: Option<&[f32]>,
        len: usize,
        src: usize,
    ) -> Result<(Vec<f32>, Vec<usize>)> {
        let mut lens = Vec::with_capacity(self.world_size);
        lens.push(len);

        let mut data = full.map(<[_]>::to_vec);

        for (i, link) in self.links.iter_mut().enumerate() {
            let rank = i + 1;

            let msg: Msg = link.rx.recv_into(&mut self.rx_buf).await?;
            match msg {
                Msg::Control(Command::Ready {
                    op: Op::Scatter,
                    len,
                }) => lens.push(len),
                other => return Err(unexpected(Op::Scatter, rank, &other)),
            }

            if rank != src {
                continue;
            }

            let msg: Msg = link.rx.recv_into(&mut self.rx_buf).await?;
            match msg {
                Msg::Data(Payload::Scatter(nums)) => data = Some(nums.to_vec()),
                other => return Err(unexpected(Op::Scatter, rank, &other)),
            }
        }

        let data = data.ok_or(CollectiveErr::SourceMismatch {
            rank: self.rank,
            src,
        })?;

        check_len(Op::Scatter, src, data.len(), lens.iter().sum())?;
        Ok((data, lens))
    }

    /// Ends a round on the hub: answers every peer with `buf`, or with the failure.
    async fn release(&mut self, gathered: Result<()>, op: Op, buf: &[f32]) -> Result<()> {
        if let Err(e) = gathered {
            self.abort(&e).await;
            return Err(e);
        }

        let msg = Msg::Data(Payload::new(op, buf));
        for link in self.links.iter_mut() {
            link.tx.send(&msg).await?;
        }

        Ok(())
    }

    /// Tells every peer the current round failed, ignoring peers that are already gone.
    async fn abort(&mut self, err: &CollectiveErr) {
        let detail = err.to_string();
        let msg = Msg::Err(Cow::Borrowed(&detail));

        for link in self.links.iter_mut() {
            let _ = link.tx.send(&msg).await;
        }
    }

    /// Waits for the hub's answer to the current round and copies it into `buf`.
    async fn recv_reply(&mut self, op: Op, buf: &mut [f32]) -> Result<()> {
        let msg: Msg = self.links[0].rx.recv_into(&mut self.rx_buf).await?;
        match msg {
            Msg::Data(payload) if payload.op() == op => {
                check_len(op, HUB, payload.nums().len(), buf.len())?;
                buf.copy_from_slice(payload.nums());
                Ok(())
            }
            Msg::Err(detail) => Err(CollectiveErr::Aborted(detail.into_owned())),
            other => Err(unexpected(op, HUB, &other)),
        }
    }
}

fn check_len(op: Op, rank: usize, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(CollectiveErr::ShapeMismatch {
            op,
            rank,
            got,
            expected,
        });
    }

    Ok(())
}

fn unexpected(op: Op, rank: usize, msg: &Msg<'_>) -> CollectiveErr {
    match msg {
        Msg::Data(payload) => CollectiveErr::OpMismatch {
            rank,
            got: payload.op(),
            expected: op,
        },
        Msg::Control(Command::Ready { op: got, .. }) => CollectiveErr::OpMismatch {
            rank,
            got: *got,
            expected: op,
        },
        Msg::Err(detail) => CollectiveErr::Aborted(detail.to_string()),
        other => CollectiveErr::UnexpectedMessage {
            rank,
            got: other.kind(),
        },
    }
}
