// HTTP-shaped login exchange performed on the raw socket before framing starts.
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::HandshakeError;

pub const LOGIN_SUCCESS_STATUS: &str = "HTTP/1.1 200 OK";
/// Upper bound on the response head; a server that never sends the blank
/// line cannot make the client buffer forever.
pub const MAX_RESPONSE_HEAD_BYTES: usize = 8 * 1024;

pub fn login_request(user: &str, credential: &str, user_agent: &str) -> String {
    format!(
        "GET /connect?uid={user}&password={credential} HTTP/1.1\r\nUser-Agent: {user_agent}\r\nAccept: */*\r\n\r\n"
    )
}

/// Send the login request and verify the response head.
///
/// The reader is left positioned at the first byte after the blank line, so
/// frames the server pipelines behind its response are not lost.
pub async fn login<R, W>(
    reader: &mut R,
    writer: &mut W,
    user: &str,
    credential: &str,
    user_agent: &str,
) -> Result<(), HandshakeError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let request = login_request(user, credential, user_agent);
    writer
        .write_all(request.as_bytes())
        .await
        .map_err(HandshakeError::Io)?;
    writer.flush().await.map_err(HandshakeError::Io)?;
    verify_login_response(reader).await
}

/// Consume the response head up to its blank `\r\n` line and check the
/// status line. A blank first line is a rejection.
pub async fn verify_login_response<R>(reader: &mut R) -> Result<(), HandshakeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(128);
    let mut status_line: Option<String> = None;
    let mut head_bytes = 0usize;
    loop {
        let remaining = MAX_RESPONSE_HEAD_BYTES.saturating_sub(head_bytes);
        if remaining == 0 {
            return Err(HandshakeError::HeadTooLarge(MAX_RESPONSE_HEAD_BYTES));
        }
        line.clear();
        let read = match (&mut *reader)
            .take(remaining as u64)
            .read_until(b'\n', &mut line)
            .await
        {
            Ok(read) => read,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(HandshakeError::Io(err)),
        };
        if read == 0 {
            return Err(HandshakeError::Closed);
        }
        head_bytes += read;
        if !line.ends_with(b"\n") {
            if head_bytes >= MAX_RESPONSE_HEAD_BYTES {
                return Err(HandshakeError::HeadTooLarge(MAX_RESPONSE_HEAD_BYTES));
            }
            return Err(HandshakeError::Closed);
        }
        if status_line.is_none() {
            status_line = Some(String::from_utf8_lossy(&line).trim_end().to_string());
        }
        if line == b"\r\n" {
            break;
        }
    }
    let status_line = status_line.unwrap_or_default();
    if status_line.contains(LOGIN_SUCCESS_STATUS) {
        Ok(())
    } else {
        Err(HandshakeError::Rejected { status_line })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn verify(input: &[u8]) -> Result<(), HandshakeError> {
        let mut reader = BufReader::new(input);
        verify_login_response(&mut reader).await
    }

    #[test]
    fn request_matches_wire_format() {
        assert_eq!(
            login_request("test_1", "test_1", "mobile_socket_client/0.1.0"),
            "GET /connect?uid=test_1&password=test_1 HTTP/1.1\r\nUser-Agent: mobile_socket_client/0.1.0\r\nAccept: */*\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn ok_status_succeeds() {
        verify(b"HTTP/1.1 200 OK\r\n\r\n").await.expect("login");
    }

    #[tokio::test]
    async fn error_status_is_rejected() {
        let err = verify(b"HTTP/1.1 500 ERR\r\n\r\n").await.expect_err("reject");
        match err {
            HandshakeError::Rejected { status_line } => assert_eq!(status_line, "HTTP/1.1 500 ERR"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_first_line_is_rejected() {
        let err = verify(b"\r\n").await.expect_err("reject");
        assert!(matches!(err, HandshakeError::Rejected { .. }));
    }

    #[tokio::test]
    async fn eof_before_terminator_fails() {
        for input in [&b""[..], b"HTTP/1.1 200 OK\r\n", b"HTTP/1.1 200 OK\r\nServer: x"] {
            let err = verify(input).await.expect_err("closed");
            assert!(matches!(err, HandshakeError::Closed), "{input:?}");
        }
    }

    #[tokio::test]
    async fn headers_are_consumed_and_following_frame_is_kept() {
        let mut input = b"HTTP/1.1 200 OK\r\nServer: push\r\nbare-lf\nContent-Length: 0\r\n\r\n".to_vec();
        input.extend_from_slice(b"7\r\n{\"y\":0}\r\n");
        let mut reader = BufReader::new(input.as_slice());
        verify_login_response(&mut reader).await.expect("login");
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.expect("rest");
        assert_eq!(rest, b"7\r\n{\"y\":0}\r\n");
    }

    #[tokio::test]
    async fn success_token_in_later_header_does_not_count() {
        let err = verify(b"HTTP/1.1 403 Forbidden\r\nX-Echo: HTTP/1.1 200 OK\r\n\r\n")
            .await
            .expect_err("reject");
        assert!(matches!(err, HandshakeError::Rejected { .. }));
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let mut input = b"HTTP/1.1 200 OK\r\n".to_vec();
        input.extend(std::iter::repeat_n(b'h', MAX_RESPONSE_HEAD_BYTES));
        let err = verify(&input).await.expect_err("too large");
        assert!(matches!(err, HandshakeError::HeadTooLarge(_)));
    }

    #[tokio::test]
    async fn login_writes_request_then_verifies() {
        let (client, mut server) = tokio::io::duplex(1024);
        let (read_half, mut write_half) = tokio::io::split(client);
        let server_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let mut received = Vec::new();
            while !received.ends_with(b"\r\n\r\n") {
                let n = server.read(&mut buf).await.expect("read");
                received.extend_from_slice(&buf[..n]);
            }
            server
                .write_all(b"HTTP/1.1 200 OK\r\n\r\n")
                .await
                .expect("write");
            received
        });
        let mut reader = BufReader::new(read_half);
        login(&mut reader, &mut write_half, "u", "p", "agent/1")
            .await
            .expect("login");
        let received = server_task.await.expect("join");
        assert!(received.starts_with(b"GET /connect?uid=u&password=p HTTP/1.1\r\n"));
    }
}
