// Receive duty: decode frames, audit sequences, emit acks.
use bytes::BytesMut;
use cometload_wire::{Inbound, OutboundAck};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;

use super::{DutyContext, Outbound};
use crate::counters::Counter;
use crate::error::SessionError;
use crate::sequence::Classification;
use crate::wire::{log_decode_error, read_frame, write_frame};

/// Where acknowledgements go once a frame has been classified.
pub(crate) enum AckSink<W> {
    /// Written by the receive duty itself.
    Inline(W),
    /// Handed to the send duty.
    Queued(mpsc::Sender<Outbound>),
}

impl<W> AckSink<W>
where
    W: AsyncWrite + Unpin,
{
    async fn deliver(&mut self, ctx: &DutyContext, ack: OutboundAck) -> Result<(), SessionError> {
        match self {
            AckSink::Inline(writer) => {
                let payload = cometload_wire::encode_ack(ctx.config.dialect, &ack)?;
                tokio::select! {
                    _ = ctx.token.cancelled() => return Ok(()),
                    result = write_frame(writer, &payload, ctx.config.write_attempts) => result?,
                }
                ctx.client.incr(Counter::AcksSent);
                Ok(())
            }
            AckSink::Queued(tx) => {
                tokio::select! {
                    _ = ctx.token.cancelled() => Ok(()),
                    result = tx.send(Outbound::Ack(ack)) => result.map_err(|_| SessionError::Closed),
                }
            }
        }
    }
}

pub(crate) async fn run<R, W>(
    ctx: DutyContext,
    mut reader: R,
    mut sink: AckSink<W>,
) -> Result<(), SessionError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = receive_loop(&ctx, &mut reader, &mut sink).await;
    match &result {
        Ok(()) => {}
        Err(err) if err.is_expected_close() => {
            tracing::debug!(user = %ctx.client.user_name(), "connection closed");
        }
        Err(err) => {
            tracing::warn!(user = %ctx.client.user_name(), error = %err, "receive duty stopped");
        }
    }
    ctx.close();
    result
}

async fn receive_loop<R, W>(
    ctx: &DutyContext,
    reader: &mut R,
    sink: &mut AckSink<W>,
) -> Result<(), SessionError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let user = ctx.client.user_name();
    let mut line = Vec::with_capacity(32);
    let mut scratch = BytesMut::with_capacity(4 * 1024);
    loop {
        let frame = tokio::select! {
            _ = ctx.token.cancelled() => return Ok(()),
            frame = read_frame(reader, &mut line, &mut scratch, ctx.config.max_frame_bytes) => frame,
        };
        let payload = match frame {
            Ok(payload) => payload,
            Err(err) => {
                if err.is_malformed() {
                    ctx.client.incr(Counter::MalformedPayloads);
                    log_decode_error("read_frame", user, &err, &line);
                }
                return Err(err);
            }
        };
        if ctx.should_stop() {
            return Ok(());
        }

        let inbound = match cometload_wire::decode_inbound(ctx.config.dialect, &payload) {
            Ok(inbound) => inbound,
            Err(err) => {
                let err = SessionError::from(err);
                ctx.client.incr(Counter::MalformedPayloads);
                log_decode_error("decode_inbound", user, &err, &payload);
                return Err(err);
            }
        };
        match inbound {
            Inbound::KeepAlive => {
                ctx.client.incr(Counter::HeartbeatsReceived);
                tracing::trace!(user, "server keep-alive");
            }
            Inbound::Data(message) => {
                let classification = ctx.client.observe_sequence(message.sequence);
                if classification != Classification::Accepted {
                    tracing::debug!(
                        user,
                        sequence = message.sequence,
                        last_seq = ctx.client.last_seq(),
                        classification = classification.as_str(),
                        "sequence anomaly"
                    );
                }
                let ack = OutboundAck {
                    sequence: message.sequence,
                    sender: user.to_string(),
                };
                sink.deliver(ctx, ack).await?;
            }
        }
    }
}
