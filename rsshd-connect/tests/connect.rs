use futures::{AsyncReadExt, AsyncWriteExt};
use rsshd::{
    packet::{
        connect::{
            ChannelClose, ChannelData, ChannelEof, ChannelFailure, ChannelOpenConfirmation,
            ChannelOpenFailure, ChannelOpenFailureReason, ChannelRequest, ChannelRequestContext,
            ChannelSuccess, ChannelWindowAdjust, GlobalRequest, RequestFailure,
        },
        trans::DisconnectReason,
    },
    Error as TransportError, ProtocolError,
};
use rsshd_connect::{Channel, Config, Connect, Error};

mod common;
use common::CLIENT_CHANNEL;

#[tokio::test]
async fn writes_wait_for_the_window() {
    let (mut server, mut client) = common::connect().await;
    let (channels, incoming) = flume::unbounded::<Channel>();

    let payload: Vec<u8> = (0..40000u32).map(|i| i as u8).collect();

    let (result, (), ()) = tokio::join!(
        Connect::new(&mut server, Config::default()).run(move |channel| {
            channels.send(channel).ok();
        }),
        async {
            let mut channel = incoming.recv_async().await.unwrap();

            let request = channel.request().await.unwrap().unwrap();
            assert!(
                matches!(request.cx(), ChannelRequestContext::Exec { command } if command == b"cat")
            );
            request.accept().unwrap();

            channel.write_all(&payload).await.unwrap();
            channel.exit(0).unwrap();
        },
        async {
            let confirmation: ChannelOpenConfirmation =
                common::open(&mut client, "session", CLIENT_CHANNEL, 32768)
                    .await
                    .to()
                    .unwrap();
            assert_eq!(confirmation.recipient_channel, CLIENT_CHANNEL);
            let server_channel = confirmation.sender_channel;

            common::request(
                &mut client,
                server_channel,
                ChannelRequestContext::Exec {
                    command: b"cat".to_vec(),
                },
            )
            .await
            .to::<ChannelSuccess>()
            .unwrap();

            let mut received = Vec::new();
            while received.len() < 32768 {
                let data: ChannelData = client.recv().await.unwrap().to().unwrap();
                assert_eq!(data.recipient_channel, CLIENT_CHANNEL);

                received.extend(data.data);
            }
            assert_eq!(received.len(), 32768);

            // The server may not send anything more on the channel until the window grows.
            client
                .send(&GlobalRequest {
                    request_type: "keepalive@openssh.com".into(),
                    want_reply: true,
                    data: Vec::new(),
                })
                .await
                .unwrap();
            client.recv().await.unwrap().to::<RequestFailure>().unwrap();

            client
                .send(&ChannelWindowAdjust {
                    recipient_channel: server_channel,
                    bytes_to_add: 32768,
                })
                .await
                .unwrap();

            let exit = loop {
                let packet = client.recv().await.unwrap();

                match packet.to::<ChannelData>() {
                    Ok(data) => received.extend(data.data),
                    Err(_) => break packet.to::<ChannelRequest>().unwrap(),
                }
            };
            assert_eq!(received, payload);
            assert_eq!(exit.context, ChannelRequestContext::ExitStatus { code: 0 });

            client.recv().await.unwrap().to::<ChannelEof>().unwrap();
            client.recv().await.unwrap().to::<ChannelClose>().unwrap();
            client
                .send(&ChannelClose {
                    recipient_channel: server_channel,
                })
                .await
                .unwrap();

            client
                .disconnect(DisconnectReason::ByApplication, "done")
                .await
                .unwrap();
        }
    );

    result.unwrap();
}

#[tokio::test]
async fn only_session_channels_are_opened() {
    let (mut server, mut client) = common::connect().await;
    let mut opened = Vec::new();

    let config = Config {
        max_channels: 1,
        ..Default::default()
    };

    let (result, ()) = tokio::join!(
        Connect::new(&mut server, config).run(|channel| opened.push(channel)),
        async {
            let failure: ChannelOpenFailure = common::open(&mut client, "direct-tcpip", 1, 1024)
                .await
                .to()
                .unwrap();
            assert_eq!(failure.recipient_channel, 1);
            assert_eq!(failure.reason, ChannelOpenFailureReason::AdministrativelyProhibited);

            let failure: ChannelOpenFailure = common::open(&mut client, "custom@example.com", 2, 1024)
                .await
                .to()
                .unwrap();
            assert_eq!(failure.reason, ChannelOpenFailureReason::UnknownChannelType);

            let confirmation: ChannelOpenConfirmation = common::open(&mut client, "session", 3, 1024)
                .await
                .to()
                .unwrap();
            assert_eq!(confirmation.sender_channel, 0);
            assert_eq!(confirmation.initial_window_size, Config::default().window_size);

            let failure: ChannelOpenFailure = common::open(&mut client, "session", 4, 1024)
                .await
                .to()
                .unwrap();
            assert_eq!(failure.reason, ChannelOpenFailureReason::ResourceShortage);

            client
                .disconnect(DisconnectReason::ByApplication, "done")
                .await
                .unwrap();
        }
    );

    result.unwrap();
    assert_eq!(opened.len(), 1);
}

#[tokio::test]
async fn a_single_program_runs_per_channel() {
    let (mut server, mut client) = common::connect().await;
    let (channels, incoming) = flume::unbounded::<Channel>();

    let (result, (), ()) = tokio::join!(
        Connect::new(&mut server, Config::default()).run(move |channel| {
            channels.send(channel).ok();
        }),
        async {
            let mut channel = incoming.recv_async().await.unwrap();

            let request = channel.request().await.unwrap().unwrap();
            assert!(matches!(request.cx(), ChannelRequestContext::Env { .. }));
            request.accept().unwrap();

            let request = channel.request().await.unwrap().unwrap();
            assert_eq!(request.cx().name(), "pty-req");
            request.reject().unwrap();

            let request = channel.request().await.unwrap().unwrap();
            assert!(request.cx().is_program());
            request.accept().unwrap();

            assert!(channel.is_started());
            assert_eq!(channel.env(), [("LANG".to_string(), "C".to_string())]);

            let mut input = Vec::new();
            channel.read_to_end(&mut input).await.unwrap();
            assert_eq!(input, b"hello");

            channel.write_all(&input).await.unwrap();
            channel.stderr().write_all(b"done").await.unwrap();
            channel.exit(3).unwrap();
        },
        async {
            let confirmation: ChannelOpenConfirmation =
                common::open(&mut client, "session", CLIENT_CHANNEL, 1024 * 1024)
                    .await
                    .to()
                    .unwrap();
            let server_channel = confirmation.sender_channel;

            common::request(
                &mut client,
                server_channel,
                ChannelRequestContext::Env {
                    name: "LANG".into(),
                    value: "C".into(),
                },
            )
            .await
            .to::<ChannelSuccess>()
            .unwrap();

            common::request(
                &mut client,
                server_channel,
                ChannelRequestContext::Pty {
                    term: "xterm".into(),
                    width_chars: 80,
                    height_rows: 24,
                    width_px: 0,
                    height_px: 0,
                    modes: Vec::new(),
                },
            )
            .await
            .to::<ChannelFailure>()
            .unwrap();

            common::request(&mut client, server_channel, ChannelRequestContext::Shell)
                .await
                .to::<ChannelSuccess>()
                .unwrap();

            // A second program is refused while the first one runs.
            common::request(
                &mut client,
                server_channel,
                ChannelRequestContext::Subsystem {
                    name: "sftp".into(),
                },
            )
            .await
            .to::<ChannelFailure>()
            .unwrap();

            client
                .send(&ChannelData {
                    recipient_channel: server_channel,
                    data: b"hello".to_vec(),
                })
                .await
                .unwrap();
            client
                .send(&ChannelEof {
                    recipient_channel: server_channel,
                })
                .await
                .unwrap();

            let data: ChannelData = client.recv().await.unwrap().to().unwrap();
            assert_eq!(data.data, b"hello");

            let stderr: rsshd::packet::connect::ChannelExtendedData =
                client.recv().await.unwrap().to().unwrap();
            assert_eq!((stderr.data_type, stderr.data.as_slice()), (1, &b"done"[..]));

            let exit: ChannelRequest = client.recv().await.unwrap().to().unwrap();
            assert_eq!(exit.context, ChannelRequestContext::ExitStatus { code: 3 });
            assert!(!exit.want_reply);

            client.recv().await.unwrap().to::<ChannelEof>().unwrap();
            client.recv().await.unwrap().to::<ChannelClose>().unwrap();

            client
                .disconnect(DisconnectReason::ByApplication, "done")
                .await
                .unwrap();
        }
    );

    result.unwrap();
}

#[tokio::test]
async fn the_window_is_credited_with_read_data_only() {
    let (mut server, mut client) = common::connect().await;
    let (channels, incoming) = flume::unbounded::<Channel>();
    let (read, reading) = flume::bounded::<()>(1);

    let config = Config {
        window_size: 32768,
        ..Default::default()
    };

    let (result, (), ()) = tokio::join!(
        Connect::new(&mut server, config).run(move |channel| {
            channels.send(channel).ok();
        }),
        async {
            let mut channel = incoming.recv_async().await.unwrap();
            channel.request().await.unwrap().unwrap().accept().unwrap();

            let mut head = vec![0; 20000];
            channel.read_exact(&mut head).await.unwrap();
            read.send_async(()).await.unwrap();

            let mut rest = Vec::new();
            channel.read_to_end(&mut rest).await.unwrap();
            assert_eq!(head.len() + rest.len(), 32768 + 20000);

            channel.exit(0).unwrap();
        },
        async {
            let confirmation: ChannelOpenConfirmation =
                common::open(&mut client, "session", CLIENT_CHANNEL, 32768)
                    .await
                    .to()
                    .unwrap();
            assert_eq!(confirmation.initial_window_size, 32768);
            let server_channel = confirmation.sender_channel;

            common::request(
                &mut client,
                server_channel,
                ChannelRequestContext::Exec {
                    command: b"cat".to_vec(),
                },
            )
            .await
            .to::<ChannelSuccess>()
            .unwrap();

            client
                .send(&ChannelData {
                    recipient_channel: server_channel,
                    data: vec![0x5e; 32768],
                })
                .await
                .unwrap();
            reading.recv_async().await.unwrap();

            // 12768 bytes are still buffered, only the read ones are credited back.
            let adjust: ChannelWindowAdjust = client.recv().await.unwrap().to().unwrap();
            assert_eq!(adjust.recipient_channel, CLIENT_CHANNEL);
            assert_eq!(adjust.bytes_to_add, 20000);

            client
                .send(&ChannelData {
                    recipient_channel: server_channel,
                    data: vec![0x5e; 20000],
                })
                .await
                .unwrap();
            client
                .send(&ChannelEof {
                    recipient_channel: server_channel,
                })
                .await
                .unwrap();

            let exit = loop {
                let packet = client.recv().await.unwrap();

                if packet.to::<ChannelWindowAdjust>().is_err() {
                    break packet.to::<ChannelRequest>().unwrap();
                }
            };
            assert_eq!(exit.context, ChannelRequestContext::ExitStatus { code: 0 });

            client.recv().await.unwrap().to::<ChannelEof>().unwrap();
            client.recv().await.unwrap().to::<ChannelClose>().unwrap();
            client
                .send(&ChannelClose {
                    recipient_channel: server_channel,
                })
                .await
                .unwrap();

            client
                .disconnect(DisconnectReason::ByApplication, "done")
                .await
                .unwrap();
        }
    );

    result.unwrap();
}

#[tokio::test]
async fn window_overflow_is_a_protocol_error() {
    let (mut server, mut client) = common::connect().await;
    let mut opened = Vec::new();

    let config = Config {
        window_size: 1024,
        ..Default::default()
    };

    let (result, ()) = tokio::join!(
        Connect::new(&mut server, config).run(|channel| opened.push(channel)),
        async {
            let confirmation: ChannelOpenConfirmation =
                common::open(&mut client, "session", CLIENT_CHANNEL, 1024)
                    .await
                    .to()
                    .unwrap();

            for size in [1024, 1] {
                client
                    .send(&ChannelData {
                        recipient_channel: confirmation.sender_channel,
                        data: vec![0; size],
                    })
                    .await
                    .unwrap();
            }

            assert!(matches!(
                client.recv().await,
                Err(TransportError::Disconnected(DisconnectReason::ProtocolError))
            ));
        }
    );

    assert!(matches!(
        result,
        Err(Error::Transport(TransportError::Protocol(
            ProtocolError::WindowExceeded
        )))
    ));
}

#[tokio::test]
async fn messages_for_unknown_channels_are_a_protocol_error() {
    let (mut server, mut client) = common::connect().await;

    let (result, ()) = tokio::join!(
        Connect::new(&mut server, Config::default()).run(drop),
        async {
            client
                .send(&ChannelData {
                    recipient_channel: 42,
                    data: b"lost".to_vec(),
                })
                .await
                .unwrap();

            assert!(matches!(
                client.recv().await,
                Err(TransportError::Disconnected(DisconnectReason::ProtocolError))
            ));
        }
    );

    assert!(matches!(
        result,
        Err(Error::Transport(TransportError::Protocol(
            ProtocolError::UnknownChannel
        )))
    ));
}
