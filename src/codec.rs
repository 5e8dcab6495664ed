use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ChatError;
use crate::protocol::Message;

/// Read exactly one length-prefixed JSON frame from `reader`.
///
/// Returns `Ok(None)` on a clean end-of-stream (no bytes at all were read for the next
/// frame's header) and `Err` if the stream closes mid-frame (a truncated length header or a
/// truncated body), since that is a protocol violation rather than an orderly close.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_size: u32,
) -> Result<Option<Message>, ChatError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(ChatError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > max_frame_size {
        return Err(ChatError::FrameTooLarge {
            size: len,
            max: max_frame_size,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ChatError::Protocol("connection closed mid-frame".to_string())
        } else {
            ChatError::Io(e)
        }
    })?;

    let message: Message = serde_json::from_slice(&body)
        .map_err(|e| ChatError::Protocol(format!("invalid frame body: {e}")))?;
    Ok(Some(message))
}

/// Encode `message` and write header+body to `writer` as a single atomic frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<(), ChatError> {
    let body = serde_json::to_vec(message)
        .map_err(|e| ChatError::Protocol(format!("failed to encode frame: {e}")))?;
    let len = u32::try_from(body.len())
        .map_err(|_| ChatError::Protocol("frame body too large to encode".to_string()))?;

    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&body);
    writer.write_all(&buf).await.map_err(ChatError::Io)?;
    writer.flush().await.map_err(ChatError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageKind, Priority};

    #[tokio::test]
    async fn round_trips_a_message_field_for_field() {
        let message = Message::new(
            MessageKind::TextMessage,
            serde_json::json!({"text": "hello"}),
            Priority::Normal,
        )
        .with_room("room-1");

        let mut buf = Vec::new();
        write_frame(&mut buf, &message).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = read_frame(&mut cursor, 16 * 1024 * 1024)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(decoded.kind_str, message.kind_str);
        assert_eq!(decoded.data, message.data);
        assert_eq!(decoded.priority, message.priority);
        assert_eq!(decoded.room_id, message.room_id);
    }

    #[tokio::test]
    async fn clean_eof_before_any_header_byte_is_not_an_error() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let result = read_frame(&mut cursor, 1024).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn truncated_body_is_a_protocol_error() {
        let len: u32 = 10;
        let mut buf = len.to_be_bytes().to_vec();
        buf.extend_from_slice(b"short");
        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor, 1024).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_allocating_the_body() {
        let len: u32 = 100;
        let buf = len.to_be_bytes().to_vec();
        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor, 10).await;
        assert!(matches!(result, Err(ChatError::FrameTooLarge { .. })));
    }
}
