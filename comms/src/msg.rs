use std::{borrow::Cow, fmt, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR: Header = 0;
const CONTROL: Header = 1;
const REDUCE: Header = 2;
const BROADCAST: Header = 3;
const SCATTER: Header = 4;

/// The collective operation a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    ReduceSum,
    Broadcast,
    Scatter,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::ReduceSum => "reduce_sum",
            Op::Broadcast => "broadcast",
            Op::Scatter => "scatter",
        };

        f.write_str(s)
    }
}

/// The float payload for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    Reduce(&'a [f32]),
    Broadcast(&'a [f32]),
    Scatter(&'a [f32]),
}

impl<'a> Payload<'a> {
    /// Builds the payload variant matching `op`.
    pub fn new(op: Op, nums: &'a [f32]) -> Self {
        match op {
            Op::ReduceSum => Payload::Reduce(nums),
            Op::Broadcast => Payload::Broadcast(nums),
            Op::Scatter => Payload::Scatter(nums),
        }
    }

    /// Returns the collective operation this payload belongs to.
    pub fn op(&self) -> Op {
        match self {
            Payload::Reduce(_) => Op::ReduceSum,
            Payload::Broadcast(_) => Op::Broadcast,
            Payload::Scatter(_) => Op::Scatter,
        }
    }

    /// Returns the carried numbers.
    pub fn nums(&self) -> &'a [f32] {
        match *self {
            Payload::Reduce(nums) | Payload::Broadcast(nums) | Payload::Scatter(nums) => nums,
        }
    }
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// First frame a peer sends to the hub after connecting.
    Hello { rank: usize, world_size: usize },
    /// A participant entered `op` without contributing data, expecting `len` numbers back.
    Ready { op: Op, len: usize },
}

/// The application layer message exchanged by the members of a process group.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short name of the message kind for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Hello { .. }) => "control/hello",
            Msg::Control(Command::Ready { .. }) => "control/ready",
            Msg::Data(Payload::Reduce(_)) => "data/reduce",
            Msg::Data(Payload::Broadcast(_)) => "data/broadcast",
            Msg::Data(Payload::Scatter(_)) => "data/scatter",
            Msg::Err(_) => "err",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL.to_be_bytes());

                // SAFETY: `Command` derives its `Serialize` impl and holds no maps, writing
                //         it into a `Vec` can't fail.
                serde_json::to_writer(buf, cmd).unwrap();
                None
            }
            Msg::Data(payload) => {
                let kind = match payload {
                    Payload::Reduce(_) => REDUCE,
                    Payload::Broadcast(_) => BROADCAST,
                    Payload::Scatter(_) => SCATTER,
                };

                buf.extend_from_slice(&kind.to_be_bytes());
                Some(bytemuck::cast_slice(payload.nums()))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);

        // SAFETY: `kind_buf` was split to be exactly `HEADER_SIZE` bytes long.
        let kind = Header::from_be_bytes(kind_buf.try_into().unwrap());

        match kind {
            ERR => {
                let detail = str::from_utf8(rest)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

                Ok(Self::Err(Cow::Borrowed(detail)))
            }
            CONTROL => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            REDUCE | BROADCAST | SCATTER => {
                let nums: &[f32] = bytemuck::try_cast_slice(rest)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{e:?}")))?;

                let payload = match kind {
                    REDUCE => Payload::Reduce(nums),
                    BROADCAST => Payload::Broadcast(nums),
                    _ => Payload::Scatter(nums),
                };

                Ok(Self::Data(payload))
            }
            other => Self::invalid_kind(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: &Msg<'_>) -> Vec<u32> {
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf);
        if let Some(tail) = tail {
            buf.extend_from_slice(tail);
        }

        // Copy into a 4 byte aligned buffer, the same way `OnoReceiver` reads frames.
        let mut aligned = vec![0u32; buf.len().div_ceil(4)];
        bytemuck::cast_slice_mut::<u32, u8>(&mut aligned)[..buf.len()].copy_from_slice(&buf);
        aligned.truncate(buf.len().div_ceil(4));
        aligned
    }

    #[test]
    fn reduce_payload_keeps_numbers_and_op() {
        let nums = [1.5, -2.0, 3.25];
        let msg = Msg::Data(Payload::Reduce(&nums));
        let aligned = roundtrip(&msg);
        let bytes: &[u8] = bytemuck::cast_slice(&aligned);

        match Msg::deserialize(bytes).unwrap() {
            Msg::Data(payload) => {
                assert_eq!(payload.op(), Op::ReduceSum);
                assert_eq!(payload.nums(), &nums);
            }
            other => panic!("unexpected msg: {other:?}"),
        }
    }

    #[test]
    fn ready_command_is_json_encoded() {
        let msg = Msg::Control(Command::Ready {
            op: Op::Scatter,
            len: 12,
        });

        let mut buf = Vec::new();
        assert!(msg.serialize(&mut buf).is_none());
        assert_eq!(&buf[HEADER_SIZE..], br#"{"ready":{"op":"scatter","len":12}}"#);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let bytes = 9u32.to_be_bytes();
        assert!(Msg::deserialize(&bytes).is_err());
    }

    #[test]
    fn short_frame_is_rejected() {
        assert!(Msg::deserialize(&[0, 1]).is_err());
    }
}
