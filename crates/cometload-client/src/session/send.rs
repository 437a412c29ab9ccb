// Send duty: sole owner of the write half in queued mode.
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

use super::{DutyContext, Outbound, SessionState};
use crate::counters::Counter;
use crate::error::SessionError;
use crate::wire::write_frame;

pub(crate) async fn run<W>(
    ctx: DutyContext,
    mut writer: W,
    mut rx: mpsc::Receiver<Outbound>,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let result = send_loop(&ctx, &mut writer, &mut rx).await;
    if let Err(err) = &result
        && !err.is_expected_close()
    {
        tracing::warn!(user = %ctx.client.user_name(), error = %err, "send duty stopped");
    }
    ctx.close();
    result
}

async fn send_loop<W>(
    ctx: &DutyContext,
    writer: &mut W,
    rx: &mut mpsc::Receiver<Outbound>,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let dialect = ctx.config.dialect;
    let heartbeat = cometload_wire::encode_heartbeat(dialect)?;
    let interval = ctx.config.effective_heartbeat_interval();
    loop {
        // The heartbeat timer restarts whenever anything else is sent.
        let outbound = tokio::select! {
            _ = ctx.token.cancelled() => return Ok(()),
            next = rx.recv() => match next {
                Some(outbound) => outbound,
                None => return Ok(()),
            },
            _ = tokio::time::sleep(interval) => Outbound::Heartbeat,
        };
        if ctx.should_stop() {
            return Ok(());
        }
        let (payload, counter) = match outbound {
            Outbound::Ack(ack) => (
                cometload_wire::encode_ack(dialect, &ack)?,
                Some(Counter::AcksSent),
            ),
            Outbound::Heartbeat => {
                if ctx.state.load() != SessionState::Active {
                    continue;
                }
                (heartbeat.clone(), Some(Counter::HeartbeatsSent))
            }
            Outbound::Payload(payload) => (payload, None),
        };
        tokio::select! {
            _ = ctx.token.cancelled() => return Ok(()),
            result = write_frame(writer, &payload, ctx.config.write_attempts) => result?,
        }
        if let Some(counter) = counter {
            ctx.client.incr(counter);
        }
    }
}
