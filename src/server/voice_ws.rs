//! WebSocket voice channel handler.
//!
//! Each connection owns one [`Session`]. The receive loop parses frames,
//! applies control messages and flag updates inline (they are cheap), and
//! ships audio chunks to the blocking worker pool by moving the session
//! into `spawn_blocking` and back — chunks of one session are therefore
//! processed strictly in receive order while other sessions proceed on
//! other workers. A finalize blocks this session's next chunk until the
//! result reply has been sent.

use crate::audio;
use crate::server::{AppState, messages};
use crate::session::{ChunkEvent, Session};
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde_json::Value;
use tracing::{debug, info, warn};

/// `GET /api/v1/voice/asr/ws` — upgrade to the voice channel.
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let session = match state.runtime.new_session() {
        Ok(session) => session,
        Err(e) => {
            warn!("session creation failed: {e}");
            let reply = messages::error(
                &format!("创建会话失败: {e}"),
                messages::ERR_SESSION_CREATE_ERROR,
            );
            let _ = send(&mut socket, &reply).await;
            let _ = socket
                .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                    code: 1011,
                    reason: "Failed to create session".into(),
                })))
                .await;
            return;
        }
    };

    let client_id = session.id().to_owned();
    info!("voice client connected: {client_id}");

    let greeting = messages::welcome(session.use_wake(), session.mode().as_str());
    let mut session = Some(session);
    if send(&mut socket, &greeting).await.is_err() {
        return;
    }

    while let Some(frame) = socket.recv().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            // Binary frames are not part of the protocol; pings are handled
            // by the transport.
            Ok(_) => continue,
        };

        let Some(current) = session.take() else {
            break;
        };
        let (returned, outcome) = handle_frame(&mut socket, current, text.as_str()).await;
        session = returned;
        if matches!(outcome, FrameOutcome::Closed) {
            break;
        }
    }

    if let Some(mut session) = session {
        session.reset();
    }
    info!("voice client disconnected: {client_id}");
}

enum FrameOutcome {
    Continue,
    Closed,
}

async fn handle_frame(
    socket: &mut WebSocket,
    mut session: Session,
    text: &str,
) -> (Option<Session>, FrameOutcome) {
    if text.is_empty() {
        let outcome = reply(
            socket,
            messages::error("空消息，忽略", messages::ERR_EMPTY_MESSAGE),
        )
        .await;
        return (Some(session), outcome);
    }

    let message: messages::ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(_) => {
            let outcome = reply(
                socket,
                messages::error("消息格式错误，需为 JSON 字符串", messages::ERR_INVALID_JSON),
            )
            .await;
            return (Some(session), outcome);
        }
    };

    // Control messages are handled inline and consume the frame.
    if let Some(kind) = message.kind.as_deref() {
        let outcome = match kind {
            "end_conversation" => {
                session.reset();
                reply(
                    socket,
                    messages::status("conversation_ended", "会话已结束，状态已重置"),
                )
                .await
            }
            "cancel_enrollment" => {
                session.cancel_enrollment();
                reply(
                    socket,
                    messages::status(
                        "enrollment_cancelled",
                        "声纹录制已取消，已回退到等待唤醒状态",
                    ),
                )
                .await
            }
            "start_asr" => {
                if session.start_asr() {
                    reply(socket, messages::status("asr_started", "已切换到ASR识别模式")).await
                } else {
                    FrameOutcome::Continue
                }
            }
            other => {
                debug!("session {}: unhandled message type '{other}'", session.id());
                FrameOutcome::Continue
            }
        };
        return (Some(session), outcome);
    }

    // Flag updates may ride on audio messages.
    if let Some(use_wake) = message.use_wake {
        session.set_use_wake(use_wake);
    }
    if let Some(use_sv) = message.use_sv {
        session.set_use_sv(use_sv);
    }
    if let Some(use_llm) = message.use_llm {
        session.set_use_llm(use_llm);
    }

    let Some(audio_b64) = message.audio() else {
        let outcome = reply(
            socket,
            messages::error(
                "缺少有效字段 'wav_base64' 或 'audio_data'",
                messages::ERR_MISSING_AUDIO_DATA,
            ),
        )
        .await;
        return (Some(session), outcome);
    };

    let samples = match audio::decode_base64_wav(audio_b64) {
        Ok(samples) => samples,
        Err(e) => {
            warn!("session {}: audio decode failed: {e}", session.id());
            let outcome = reply(
                socket,
                messages::error(
                    &format!("音频解码失败: {e}"),
                    messages::ERR_AUDIO_DECODE_ERROR,
                ),
            )
            .await;
            return (Some(session), outcome);
        }
    };

    // Heavy per-chunk work runs on the blocking pool; the session travels
    // with it so chunk processing stays strictly ordered.
    let (mut session, event) = match tokio::task::spawn_blocking(move || {
        let event = session.ingest_chunk(&samples, std::time::Instant::now());
        (session, event)
    })
    .await
    {
        Ok(result) => result,
        Err(e) => {
            warn!("chunk worker failed: {e}");
            let _ = send(
                socket,
                &messages::error("处理音频片段时发生错误", messages::ERR_PROCESSING_ERROR),
            )
            .await;
            return (None, FrameOutcome::Closed);
        }
    };

    match event {
        ChunkEvent::None => (Some(session), FrameOutcome::Continue),
        ChunkEvent::Wakened => {
            let outcome = reply(socket, messages::wakeup()).await;
            (Some(session), outcome)
        }
        ChunkEvent::EnrollmentCompleted => {
            let outcome = reply(socket, messages::enrollment_completed()).await;
            (Some(session), outcome)
        }
        ChunkEvent::ReadyToFinalize => {
            if send(socket, &messages::finalizing()).await.is_err() {
                return (Some(session), FrameOutcome::Closed);
            }
            match tokio::task::spawn_blocking(move || {
                let final_text = session.finalize();
                (session, final_text)
            })
            .await
            {
                Ok((session, final_text)) => {
                    info!("session {}: final result '{final_text}'", session.id());
                    let outcome = reply(socket, messages::result(&final_text)).await;
                    (Some(session), outcome)
                }
                Err(e) => {
                    warn!("finalize worker failed: {e}");
                    let _ = send(
                        socket,
                        &messages::error("处理音频片段时发生错误", messages::ERR_PROCESSING_ERROR),
                    )
                    .await;
                    (None, FrameOutcome::Closed)
                }
            }
        }
    }
}

async fn reply(socket: &mut WebSocket, value: Value) -> FrameOutcome {
    match send(socket, &value).await {
        Ok(()) => FrameOutcome::Continue,
        Err(()) => FrameOutcome::Closed,
    }
}

async fn send(socket: &mut WebSocket, value: &Value) -> Result<(), ()> {
    let payload = value.to_string();
    socket
        .send(Message::Text(payload.into()))
        .await
        .map_err(|_| ())
}
