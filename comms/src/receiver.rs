//! The receiving end of a framed link.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Align4, Deserialize, LEN_TYPE_SIZE, LenType};

/// Reads length-prefixed frames from an async reader.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    /// Creates a new `OnoReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self { rx }
    }

    /// Waits for the next frame and deserializes it.
    ///
    /// # Arguments
    /// * `buf` - The buffer the frame is read into, the returned `T` borrows from it. Its
    ///           element type keeps the frame 4 bytes aligned so float payloads can be
    ///           reinterpreted in place.
    ///
    /// # Returns
    /// The deserialized `T` or an `io::Error` if reading or decoding failed.
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Align4,
    {
        let mut len_buf = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut len_buf).await?;
        let len = LenType::from_be_bytes(len_buf) as usize;

        let needed = len.div_ceil(size_of::<B>());
        buf.clear();
        buf.resize(needed, B::zeroed());

        let bytes: &mut [u8] = bytemuck::cast_slice_mut(buf.as_mut_slice());
        let frame = &mut bytes[..len];
        self.rx.read_exact(frame).await?;

        T::deserialize(frame)
    }
}
