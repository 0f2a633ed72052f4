//! End-to-end SOCKS5 negotiation against a scripted proxy over an
//! in-memory duplex stream.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream};

use preen_bytestreams::{Credentials, FrameError, NegotiationError, Socks5Client, TargetAddr};

async fn read_greeting(stream: &mut (impl AsyncRead + Unpin)) -> Vec<u8> {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(head[0], 0x05);
    let mut methods = vec![0u8; head[1] as usize];
    stream.read_exact(&mut methods).await.unwrap();
    methods
}

async fn read_connect_request(stream: &mut DuplexStream) -> (Vec<u8>, u16) {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(&head[..3], &[0x05, 0x01, 0x00]);
    assert_eq!(head[3], 0x03, "tests always connect by domain");

    let mut len = [0u8; 1];
    stream.read_exact(&mut len).await.unwrap();
    let mut name = vec![0u8; len[0] as usize];
    stream.read_exact(&mut name).await.unwrap();
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await.unwrap();
    (name, u16::from_be_bytes(port))
}

#[tokio::test]
async fn negotiates_connect_without_auth() {
    let (mut client_side, mut server_side) = tokio::io::duplex(1024);

    let server = tokio::spawn(async move {
        let methods = read_greeting(&mut server_side).await;
        assert_eq!(methods, vec![0x00]);
        server_side.write_all(&[0x05, 0x00]).await.unwrap();

        let (name, port) = read_connect_request(&mut server_side).await;
        assert_eq!(name, b"example.com");
        assert_eq!(port, 1080);

        server_side
            .write_all(&[0x05, 0x00, 0x00, 0x01, 198, 51, 100, 4, 0x23, 0x5A])
            .await
            .unwrap();
    });

    let bound = Socks5Client::new()
        .connect(
            &mut client_side,
            &TargetAddr::Domain("example.com".into(), 1080),
        )
        .await
        .expect("negotiation should succeed");

    assert_eq!(
        bound,
        TargetAddr::Ip(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(198, 51, 100, 4)),
            9050
        ))
    );
    server.await.unwrap();
}

#[tokio::test]
async fn negotiates_with_username_password() {
    let (mut client_side, mut server_side) = tokio::io::duplex(1024);

    let server = tokio::spawn(async move {
        let methods = read_greeting(&mut server_side).await;
        assert_eq!(methods, vec![0x00, 0x02]);
        server_side.write_all(&[0x05, 0x02]).await.unwrap();

        let mut version = [0u8; 1];
        server_side.read_exact(&mut version).await.unwrap();
        assert_eq!(version[0], 0x01);
        let mut ulen = [0u8; 1];
        server_side.read_exact(&mut ulen).await.unwrap();
        let mut username = vec![0u8; ulen[0] as usize];
        server_side.read_exact(&mut username).await.unwrap();
        let mut plen = [0u8; 1];
        server_side.read_exact(&mut plen).await.unwrap();
        let mut password = vec![0u8; plen[0] as usize];
        server_side.read_exact(&mut password).await.unwrap();
        assert_eq!(username, b"proxyuser");
        assert_eq!(password, b"hunter2");
        server_side.write_all(&[0x01, 0x00]).await.unwrap();

        let _ = read_connect_request(&mut server_side).await;
        server_side
            .write_all(&[0x05, 0x00, 0x00, 0x01, 10, 0, 0, 1, 0x00, 0x50])
            .await
            .unwrap();
    });

    let client = Socks5Client::with_credentials(Credentials {
        username: "proxyuser".into(),
        password: "hunter2".into(),
    });
    let bound = client
        .connect(
            &mut client_side,
            &TargetAddr::Domain("files.example.org".into(), 7777),
        )
        .await
        .expect("negotiation should succeed");

    assert_eq!(
        bound,
        TargetAddr::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 80))
    );
    server.await.unwrap();
}

#[tokio::test]
async fn server_selecting_unoffered_method_fails() {
    let (mut client_side, mut server_side) = tokio::io::duplex(1024);

    let server = tokio::spawn(async move {
        let _ = read_greeting(&mut server_side).await;
        // picks username/password although the client never offered it
        server_side.write_all(&[0x05, 0x02]).await.unwrap();
    });

    let error = Socks5Client::new()
        .connect(
            &mut client_side,
            &TargetAddr::Domain("example.com".into(), 1080),
        )
        .await
        .expect_err("negotiation must fail");

    assert!(matches!(error, NegotiationError::UnexpectedMethod(0x02)));
    server.await.unwrap();
}

#[tokio::test]
async fn server_refusing_all_methods_fails() {
    let (mut client_side, mut server_side) = tokio::io::duplex(1024);

    let server = tokio::spawn(async move {
        let _ = read_greeting(&mut server_side).await;
        server_side.write_all(&[0x05, 0xFF]).await.unwrap();
    });

    let error = Socks5Client::new()
        .connect(
            &mut client_side,
            &TargetAddr::Domain("example.com".into(), 1080),
        )
        .await
        .expect_err("negotiation must fail");

    assert!(matches!(error, NegotiationError::NoAcceptableMethod));
    server.await.unwrap();
}

#[tokio::test]
async fn auth_rejection_is_fatal() {
    let (mut client_side, mut server_side) = tokio::io::duplex(1024);

    let server = tokio::spawn(async move {
        let _ = read_greeting(&mut server_side).await;
        server_side.write_all(&[0x05, 0x02]).await.unwrap();

        let mut version = [0u8; 1];
        server_side.read_exact(&mut version).await.unwrap();
        let mut ulen = [0u8; 1];
        server_side.read_exact(&mut ulen).await.unwrap();
        let mut skip = vec![0u8; ulen[0] as usize];
        server_side.read_exact(&mut skip).await.unwrap();
        let mut plen = [0u8; 1];
        server_side.read_exact(&mut plen).await.unwrap();
        let mut skip = vec![0u8; plen[0] as usize];
        server_side.read_exact(&mut skip).await.unwrap();

        server_side.write_all(&[0x01, 0x01]).await.unwrap();
    });

    let client = Socks5Client::with_credentials(Credentials {
        username: "proxyuser".into(),
        password: "wrong".into(),
    });
    let error = client
        .connect(
            &mut client_side,
            &TargetAddr::Domain("example.com".into(), 1080),
        )
        .await
        .expect_err("negotiation must fail");

    assert!(matches!(error, NegotiationError::AuthRejected(0x01)));
    server.await.unwrap();
}

#[tokio::test]
async fn proxy_refusal_reply_is_surfaced() {
    let (mut client_side, mut server_side) = tokio::io::duplex(1024);

    let server = tokio::spawn(async move {
        let _ = read_greeting(&mut server_side).await;
        server_side.write_all(&[0x05, 0x00]).await.unwrap();
        let _ = read_connect_request(&mut server_side).await;
        // host unreachable
        server_side
            .write_all(&[0x05, 0x04, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();
    });

    let error = Socks5Client::new()
        .connect(
            &mut client_side,
            &TargetAddr::Domain("unreachable.example".into(), 1080),
        )
        .await
        .expect_err("negotiation must fail");

    assert!(matches!(error, NegotiationError::RequestRefused(0x04)));
    server.await.unwrap();
}

#[tokio::test]
async fn non_utf8_bound_domain_is_rejected() {
    let (mut client_side, mut server_side) = tokio::io::duplex(1024);

    let server = tokio::spawn(async move {
        let _ = read_greeting(&mut server_side).await;
        server_side.write_all(&[0x05, 0x00]).await.unwrap();
        let _ = read_connect_request(&mut server_side).await;
        // bound address by domain, with bytes that are not UTF-8
        server_side
            .write_all(&[0x05, 0x00, 0x00, 0x03, 0x04, 0xFF, 0xFE, 0x61, 0x62, 0x1F, 0x90])
            .await
            .unwrap();
    });

    let error = Socks5Client::new()
        .connect(
            &mut client_side,
            &TargetAddr::Domain("example.com".into(), 1080),
        )
        .await
        .expect_err("negotiation must fail");

    assert!(matches!(
        error,
        NegotiationError::Frame(FrameError::InvalidDomain)
    ));
    server.await.unwrap();
}
