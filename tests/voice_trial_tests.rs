//! Voice trial over a live socket with in-memory audio devices.

mod common;

use base64::{engine::general_purpose, Engine as _};
use common::{eventually, test_state, ServerConn, TestServer, WAIT};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use trial_session_client::api::TrialInfo;
use trial_session_client::audio::memory::{RecordingSpeaker, ScriptedMicrophone};
use trial_session_client::audio::MicPermission;
use trial_session_client::session::{
    AudioDevices, RecordingState, StopOutcome, VoiceNotice, VoiceTrialClient,
};
use trial_session_client::socket::ConnectionState;
use trial_session_client::state::ClientState;
use trial_session_client::transcript::{Origin, RoleType};

fn speech(samples: usize) -> Vec<i16> {
    (0..samples)
        .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
        .collect()
}

fn seed() -> TrialInfo {
    serde_json::from_value(json!({
        "session_id": "t-1",
        "status": "active",
        "agents": [
            {"role": "judge", "name": "Judge Harper", "traits": []},
            {"role": "prosecutor", "name": "Mr. Vance", "traits": []}
        ],
        "messages": [
            {"id": "msg_0", "type": "system", "content": "Court is in session.", "timestamp": "2025-01-01T10:00:00"}
        ]
    }))
    .unwrap()
}

struct Harness {
    client: VoiceTrialClient,
    notices: UnboundedReceiver<VoiceNotice>,
    conn: ServerConn,
    server: TestServer,
    microphone: Arc<ScriptedMicrophone>,
    speaker: Arc<RecordingSpeaker>,
    state: ClientState,
}

async fn start(microphone: ScriptedMicrophone, speaker: RecordingSpeaker) -> Harness {
    let mut server = TestServer::start().await;
    let state = test_state(&server, 3);
    let microphone = Arc::new(microphone);
    let speaker = Arc::new(speaker);
    let devices = AudioDevices {
        microphone: microphone.clone(),
        speaker: speaker.clone(),
    };

    let (client, notices) = VoiceTrialClient::connect(&state, "t-1", devices, Some(seed()))
        .await
        .unwrap();
    let mut conn = server.accept().await;
    conn.send_json(json!({"type": "connected", "session_id": "t-1"})).await;

    Harness {
        client,
        notices,
        conn,
        server,
        microphone,
        speaker,
        state,
    }
}

/// Read notices until one matches, returning everything seen.
async fn wait_for<F>(notices: &mut UnboundedReceiver<VoiceNotice>, mut matches: F) -> Vec<VoiceNotice>
where
    F: FnMut(&VoiceNotice) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let notice = tokio::time::timeout(WAIT, notices.recv())
            .await
            .expect("expected notice did not arrive")
            .expect("notice channel closed");
        let done = matches(&notice);
        seen.push(notice);
        if done {
            return seen;
        }
    }
}

#[tokio::test]
async fn test_push_to_talk_round_trip() {
    let mut h = start(ScriptedMicrophone::new(speech(16000)), RecordingSpeaker::new()).await;
    wait_for(&mut h.notices, |n| matches!(n, VoiceNotice::Connected { .. })).await;

    assert_eq!(h.client.transcript().len(), 1);
    assert!(h.client.request_start().await.unwrap());
    assert_eq!(h.client.recording_state(), RecordingState::Recording);
    assert_eq!(h.microphone.live_streams(), 1);

    assert_eq!(h.client.request_stop().await.unwrap(), StopOutcome::Submitted);
    assert_eq!(h.client.recording_state(), RecordingState::Processing);
    assert_eq!(h.microphone.live_streams(), 0);

    let frame = h.conn.recv_json().await.unwrap();
    assert_eq!(frame["type"], "audio");
    let wav = general_purpose::STANDARD
        .decode(frame["audio"].as_str().unwrap())
        .unwrap();
    assert!(wav.starts_with(b"RIFF"));
    assert!(wav.len() > 16000 * 2);

    // Still processing: a second press is refused
    assert!(!h.client.request_start().await.unwrap());

    h.conn.send_json(json!({"type": "transcription", "text": "Objection, hearsay."})).await;
    h.conn.send_json(json!({"type": "agent_thinking", "role": "judge"})).await;
    wait_for(&mut h.notices, |n| {
        matches!(n, VoiceNotice::ThinkingStarted(Some(RoleType::Judge)))
    })
    .await;
    assert_eq!(h.client.recording_state(), RecordingState::Idle);
    assert!(h.client.thinking().is_thinking(RoleType::Judge));

    h.conn
        .send_json(json!({"type": "agent_response", "role": "judge", "content": "Sustained."}))
        .await;
    let seen = wait_for(&mut h.notices, |n| matches!(n, VoiceNotice::MessageCommitted(_))).await;
    assert!(seen.contains(&VoiceNotice::ThinkingStopped(Some(RoleType::Judge))));

    let transcript = h.client.transcript();
    let last = transcript.last().unwrap();
    assert_eq!(last.origin, Origin::Agent);
    assert_eq!(last.role, Some(RoleType::Judge));
    assert_eq!(last.content, "Sustained.");
    assert!(!h.client.thinking().any());
    assert_eq!(h.client.speaker_label(last.role), "Judge Harper");

    h.client.close();
}

#[tokio::test]
async fn test_short_recording_is_not_sent() {
    let mut h = start(ScriptedMicrophone::new(speech(100)), RecordingSpeaker::new()).await;
    wait_for(&mut h.notices, |n| matches!(n, VoiceNotice::Connected { .. })).await;

    assert!(h.client.request_start().await.unwrap());
    assert_eq!(h.client.request_stop().await.unwrap(), StopOutcome::TooShort);
    assert_eq!(h.client.recording_state(), RecordingState::Idle);
    assert_eq!(h.microphone.live_streams(), 0);

    h.conn.expect_silence(Duration::from_millis(150)).await;
    assert_eq!(h.state.get_metrics_snapshot().messages_sent, 0);

    // Releasing again without a press is refused
    assert_eq!(h.client.request_stop().await.unwrap(), StopOutcome::Refused);

    h.client.close();
}

#[tokio::test]
async fn test_second_clip_dropped_while_first_plays() {
    let mut h = start(
        ScriptedMicrophone::new(speech(16000)),
        RecordingSpeaker::with_duration(Duration::from_millis(300)),
    )
    .await;
    wait_for(&mut h.notices, |n| matches!(n, VoiceNotice::Connected { .. })).await;

    let one = general_purpose::STANDARD.encode(b"clip-one");
    let two = general_purpose::STANDARD.encode(b"clip-two");
    h.conn
        .send_json(json!({"type": "agent_audio", "role": "judge", "audio": one}))
        .await;
    h.conn
        .send_json(json!({"type": "agent_audio", "role": "prosecutor", "audio": two}))
        .await;

    let seen = wait_for(&mut h.notices, |n| {
        matches!(n, VoiceNotice::AudioDropped(RoleType::Prosecutor))
    })
    .await;
    assert!(seen.contains(&VoiceNotice::SpeakingStarted(Some(RoleType::Judge))));
    assert_eq!(h.client.speaking().and_then(|m| m.role), Some(RoleType::Judge));

    // No recording while an agent is speaking
    assert!(!h.client.request_start().await.unwrap());

    wait_for(&mut h.notices, |n| {
        matches!(n, VoiceNotice::SpeakingStopped(Some(RoleType::Judge)))
    })
    .await;
    assert!(h.client.speaking().is_none());
    assert_eq!(h.speaker.played(), vec![b"clip-one".to_vec()]);

    assert!(h.client.request_start().await.unwrap());
    h.client.close();
}

#[tokio::test]
async fn test_synthesizing_marker_cleared_by_fallback() {
    let mut h = start(ScriptedMicrophone::new(speech(16000)), RecordingSpeaker::new()).await;
    wait_for(&mut h.notices, |n| matches!(n, VoiceNotice::Connected { .. })).await;

    h.conn.send_json(json!({"type": "synthesizing", "role": "prosecutor"})).await;
    wait_for(&mut h.notices, |n| {
        matches!(n, VoiceNotice::SpeakingStarted(Some(RoleType::Prosecutor)))
    })
    .await;

    // No audio follows; the fallback timer clears the indicator
    wait_for(&mut h.notices, |n| {
        matches!(n, VoiceNotice::SpeakingStopped(Some(RoleType::Prosecutor)))
    })
    .await;
    assert!(h.client.speaking().is_none());

    h.client.close();
}

#[tokio::test]
async fn test_permission_prompt_then_grant() {
    let mut h = start(
        ScriptedMicrophone::new(speech(16000)).with_permission(MicPermission::Prompt),
        RecordingSpeaker::new(),
    )
    .await;
    wait_for(&mut h.notices, |n| matches!(n, VoiceNotice::Connected { .. })).await;

    assert_eq!(h.client.permission().await, MicPermission::Prompt);
    assert!(!h.client.request_start().await.unwrap());
    assert_eq!(h.microphone.open_count(), 0);

    assert_eq!(
        h.client.request_permission().await.unwrap(),
        MicPermission::Granted
    );
    assert_eq!(h.microphone.live_streams(), 0);
    assert!(h.client.request_start().await.unwrap());
    assert_eq!(h.client.recording_state(), RecordingState::Recording);

    h.client.close();
}

#[tokio::test]
async fn test_denied_microphone_refuses_to_record() {
    let h = start(
        ScriptedMicrophone::new(speech(16000)).with_permission(MicPermission::Denied),
        RecordingSpeaker::new(),
    )
    .await;

    assert!(!h.client.request_start().await.unwrap());
    assert!(h.client.request_permission().await.is_err());
    assert_eq!(h.client.permission().await, MicPermission::Denied);
    assert_eq!(h.client.recording_state(), RecordingState::Idle);

    h.client.close();
}

#[tokio::test]
async fn test_text_input_and_end_of_trial() {
    let mut h = start(ScriptedMicrophone::new(speech(16000)), RecordingSpeaker::new()).await;
    wait_for(&mut h.notices, |n| matches!(n, VoiceNotice::Connected { .. })).await;

    h.client.send_text("I call the witness.").unwrap();
    assert_eq!(
        h.conn.recv_json().await.unwrap(),
        json!({"type": "text", "text": "I call the witness."})
    );
    assert_eq!(h.client.recording_state(), RecordingState::Processing);

    h.conn
        .send_json(json!({"type": "user_message", "text": "I call the witness."}))
        .await;
    h.conn.send_json(json!({"type": "error", "message": "agent unavailable"})).await;
    wait_for(&mut h.notices, |n| matches!(n, VoiceNotice::ServerError(_))).await;
    assert_eq!(h.client.recording_state(), RecordingState::Idle);
    assert_eq!(h.client.transcript().last().unwrap().origin, Origin::User);

    h.client.end_trial().unwrap();
    assert_eq!(h.conn.recv_json().await.unwrap(), json!({"type": "end_trial"}));

    h.conn.send_json(json!({"type": "trial_ended"})).await;
    wait_for(&mut h.notices, |n| matches!(n, VoiceNotice::TrialEnded)).await;

    assert!(h.client.has_ended());
    assert!(eventually(|| h.client.connection_state() == ConnectionState::Disconnected).await);
    assert!(h.conn.recv_json().await.is_none());
    h.server.expect_no_connection(Duration::from_millis(150)).await;

    assert!(!h.client.request_start().await.unwrap());
    assert!(h.client.end_trial().is_err());
}

#[tokio::test]
async fn test_reconnect_releases_processing() {
    let mut h = start(ScriptedMicrophone::new(speech(16000)), RecordingSpeaker::new()).await;
    wait_for(&mut h.notices, |n| matches!(n, VoiceNotice::Connected { .. })).await;

    assert!(h.client.request_start().await.unwrap());
    assert_eq!(h.client.request_stop().await.unwrap(), StopOutcome::Submitted);
    assert_eq!(h.conn.recv_json().await.unwrap()["type"], "audio");
    h.conn.send_json(json!({"type": "agent_thinking"})).await;
    wait_for(&mut h.notices, |n| matches!(n, VoiceNotice::ThinkingStarted(None))).await;
    assert_eq!(h.client.recording_state(), RecordingState::Processing);

    // The reply to that clip dies with the connection
    h.conn.kill();
    let _second = h.server.accept().await;

    let seen = wait_for(&mut h.notices, |n| {
        matches!(n, VoiceNotice::RecordingChanged(RecordingState::Idle))
    })
    .await;
    assert!(seen.contains(&VoiceNotice::ThinkingStopped(None)));
    assert!(!h.client.thinking().any());
    assert_eq!(h.client.connection_state(), ConnectionState::Connected);

    assert!(h.client.request_start().await.unwrap());
    assert_eq!(h.client.recording_state(), RecordingState::Recording);

    h.client.close();
}
