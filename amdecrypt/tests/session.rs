use amdecrypt::{
    PREFETCH_KEY,
    session::{DecryptionSession, PREFETCH_KEY_ID, TcpTransport},
    testing::{MOCK_MASK, MockPeer, MockTransport, PeerEvent, spawn_tcp_peer},
};
use amdecrypt_mp4::Sample;
use std::{error::Error, net::TcpStream, time::Duration};

fn sample(len: usize, description_index: u32, seed: u8) -> Sample {
    Sample {
        data: (0..len).map(|x| seed.wrapping_add(x as u8)).collect(),
        duration: 1024,
        description_index,
    }
}

/// Two prefetch samples, then one song key sample with a clear tail.
fn samples() -> Vec<Sample> {
    vec![sample(16, 0, 0), sample(32, 0, 100), sample(20, 1, 200)]
}

fn expected_events() -> Vec<PeerEvent> {
    vec![
        PeerEvent::Register {
            id: PREFETCH_KEY_ID.to_owned(),
            uri: PREFETCH_KEY.to_owned(),
        },
        PeerEvent::Cipher {
            key_id: PREFETCH_KEY_ID.to_owned(),
            len: 16,
        },
        PeerEvent::Cipher {
            key_id: PREFETCH_KEY_ID.to_owned(),
            len: 32,
        },
        PeerEvent::Switch,
        PeerEvent::Register {
            id: "1440935467".to_owned(),
            uri: "skd://itunes.apple.com/song".to_owned(),
        },
        PeerEvent::Cipher {
            key_id: "1440935467".to_owned(),
            len: 16,
        },
        PeerEvent::Close,
    ]
}

fn expected_plaintext(samples: &[Sample]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|x| {
            let prefix = x.encrypted_len();
            x.data
                .iter()
                .enumerate()
                .map(move |(i, byte)| if i < prefix { byte ^ MOCK_MASK } else { *byte })
        })
        .collect()
}

#[test]
fn wire_framing() -> Result<(), Box<dyn Error>> {
    let samples = samples();
    let mut session = DecryptionSession::new(
        MockTransport::default(),
        "1440935467",
        "skd://itunes.apple.com/song",
    )?;

    let plaintext = session.decrypt_samples(&samples, |_| ())?;
    assert_eq!(session.active_key(), Some(1));
    let transport = session.close()?;

    assert_eq!(transport.peer.events(), &expected_events()[..]);
    assert_eq!(plaintext, expected_plaintext(&samples));

    let mut wire = vec![1, b'0', PREFETCH_KEY.len() as u8];
    wire.extend_from_slice(PREFETCH_KEY.as_bytes());
    wire.extend_from_slice(&16u32.to_le_bytes());
    wire.extend_from_slice(&samples[0].data);
    wire.extend_from_slice(&32u32.to_le_bytes());
    wire.extend_from_slice(&samples[1].data);
    wire.extend_from_slice(&[0; 4]);
    wire.extend_from_slice(&[10]);
    wire.extend_from_slice(b"1440935467");
    wire.extend_from_slice(&[27]);
    wire.extend_from_slice(b"skd://itunes.apple.com/song");
    wire.extend_from_slice(&16u32.to_le_bytes());
    wire.extend_from_slice(&samples[2].data[..16]);
    wire.extend_from_slice(&[0; 5]);

    assert_eq!(transport.sent, wire);
    Ok(())
}

#[test]
fn wire_framing_over_tcp() -> Result<(), Box<dyn Error>> {
    let samples = samples();
    let (addr, handle) = spawn_tcp_peer(vec![MockPeer::default()])?;

    let stream = TcpStream::connect(addr)?;
    let transport = TcpTransport::from_stream(stream, Duration::from_secs(10), 4096)?;
    assert_eq!(transport.peer_addr()?, addr);

    let mut session = DecryptionSession::new(
        transport,
        "1440935467",
        "skd://itunes.apple.com/song",
    )?;
    let plaintext = session.decrypt_samples(&samples, |_| ())?;
    drop(session.close()?);

    let events = handle.join().unwrap()?;
    assert_eq!(events, vec![expected_events()]);
    assert_eq!(plaintext, expected_plaintext(&samples));
    Ok(())
}

#[test]
fn key_switches_back_and_forth() -> Result<(), Box<dyn Error>> {
    let samples = vec![sample(16, 1, 0), sample(16, 0, 0), sample(16, 1, 0)];
    let mut session = DecryptionSession::new(MockTransport::default(), "7", "skd://k")?;
    session.decrypt_samples(&samples, |_| ())?;
    let transport = session.close()?;

    let kinds = transport
        .peer
        .events()
        .iter()
        .map(|x| match x {
            PeerEvent::Register { id, .. } => format!("register {id}"),
            PeerEvent::Switch => "switch".to_owned(),
            PeerEvent::Cipher { key_id, .. } => format!("cipher {key_id}"),
            PeerEvent::Close => "close".to_owned(),
        })
        .collect::<Vec<_>>();

    assert_eq!(
        kinds,
        [
            "register 7",
            "cipher 7",
            "switch",
            "register 0",
            "cipher 0",
            "switch",
            "register 7",
            "cipher 7",
            "close",
        ]
    );
    Ok(())
}

#[test]
fn progress_counts_every_sample() -> Result<(), Box<dyn Error>> {
    let samples = vec![sample(3, 0, 0), sample(16, 0, 0), sample(0, 1, 0)];
    let mut session = DecryptionSession::new(MockTransport::default(), "7", "skd://k")?;
    let mut calls = Vec::new();

    let plaintext = session.decrypt_samples(&samples, |x| calls.push(x))?;

    assert_eq!(calls, vec![1, 2, 3]);
    assert_eq!(plaintext.len(), 19);
    Ok(())
}
