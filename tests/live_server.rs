// Copyright 2024 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! End-to-end tests exercising a live server over real sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use pitfall::class::Class;
use pitfall::io::{Endpoint, ShutdownController};
use pitfall::message::{Qtype, Question, Rcode, Reader, Writer};
use pitfall::rr::Type;
use pitfall::scenario::ScenarioSet;
use pitfall::server::Server;

/// Binds a server for the given scenario on an ephemeral port.
async fn start_scenario(id: &str) -> (SocketAddr, ShutdownController) {
    let scenario = ScenarioSet::builtin().get(id).unwrap();
    let store = Arc::new(scenario.build_store().unwrap());
    let server = Arc::new(Server::new(store));
    let endpoint = Endpoint::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = endpoint.local_addr();
    let controller = endpoint.start(&server);
    (addr, controller)
}

fn make_query(qname: &str, qtype: Qtype) -> Vec<u8> {
    let mut buf = vec![0; 512];
    let mut writer = Writer::new(&mut buf, 512).unwrap();
    writer.set_id(0x77aa);
    writer.set_rd(true);
    writer
        .add_question(&Question {
            qname: qname.parse().unwrap(),
            qtype,
            qclass: Class::IN.into(),
        })
        .unwrap();
    let len = writer.finish();
    buf.truncate(len);
    buf
}

#[tokio::test]
async fn udp_queries_get_authoritative_answers() {
    let (addr, controller) = start_scenario("multiple-spf").await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(
            &make_query("multiple-spf.dnstest.local.", Type::TXT.into()),
            addr,
        )
        .await
        .unwrap();
    let mut response = vec![0; 512];
    let (len, _) = timeout(Duration::from_secs(2), client.recv_from(&mut response))
        .await
        .expect("no response within the query budget")
        .unwrap();
    response.truncate(len);

    let mut reader = Reader::try_from(response.as_slice()).unwrap();
    assert_eq!(reader.id(), 0x77aa);
    assert!(reader.qr());
    assert!(reader.aa());
    assert_eq!(reader.rcode(), Rcode::NoError);
    assert_eq!(reader.ancount(), 2);
    reader.read_question().unwrap();
    for _ in 0..2 {
        let rr = reader.read_rr().unwrap();
        assert!(rr.data.txt_text().unwrap().starts_with("v=spf1"));
    }

    controller.shut_down().await;
}

#[tokio::test]
async fn udp_nxdomain_for_uncovered_names() {
    let (addr, controller) = start_scenario("clean").await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&make_query("nowhere.invalid.", Type::A.into()), addr)
        .await
        .unwrap();
    let mut response = vec![0; 512];
    let (len, _) = timeout(Duration::from_secs(2), client.recv_from(&mut response))
        .await
        .expect("no response within the query budget")
        .unwrap();
    response.truncate(len);

    let reader = Reader::try_from(response.as_slice()).unwrap();
    assert_eq!(reader.rcode(), Rcode::NxDomain);

    controller.shut_down().await;
}

#[tokio::test]
async fn tcp_queries_are_served_with_length_framing() {
    let (addr, controller) = start_scenario("cname-conflict").await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let query = make_query("www.cname-conflict.dnstest.local.", Qtype::ANY);
    let mut framed = Vec::with_capacity(2 + query.len());
    framed.extend_from_slice(&u16::to_be_bytes(query.len() as u16));
    framed.extend_from_slice(&query);
    stream.write_all(&framed).await.unwrap();

    let mut len_octets = [0; 2];
    timeout(Duration::from_secs(2), stream.read_exact(&mut len_octets))
        .await
        .expect("no response within the query budget")
        .unwrap();
    let response_len = u16::from_be_bytes(len_octets) as usize;
    let mut response = vec![0; response_len];
    stream.read_exact(&mut response).await.unwrap();

    let mut reader = Reader::try_from(response.as_slice()).unwrap();
    assert!(reader.aa());
    assert_eq!(reader.rcode(), Rcode::NoError);
    // The deliberately conflicting CNAME and A records both come back.
    assert_eq!(reader.ancount(), 2);
    reader.read_question().unwrap();
    let mut types = vec![
        reader.read_rr().unwrap().rr_type,
        reader.read_rr().unwrap().rr_type,
    ];
    types.sort();
    assert_eq!(types, vec![Type::A, Type::CNAME]);

    drop(stream);
    controller.shut_down().await;
}

#[tokio::test]
async fn malformed_datagrams_get_formerr_responses() {
    let (addr, controller) = start_scenario("clean").await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(b"\xde\xad\xbe", addr).await.unwrap();
    let mut response = vec![0; 512];
    let (len, _) = timeout(Duration::from_secs(2), client.recv_from(&mut response))
        .await
        .expect("malformed input must be answered, not dropped")
        .unwrap();
    response.truncate(len);

    let reader = Reader::try_from(response.as_slice()).unwrap();
    assert_eq!(reader.id(), 0xdead);
    assert_eq!(reader.rcode(), Rcode::FormErr);

    controller.shut_down().await;
}

#[tokio::test]
async fn shutdown_drains_and_releases_the_port() {
    let (addr, controller) = start_scenario("clean").await;

    // Prove the server is actually up first.
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&make_query("clean.dnstest.local.", Type::A.into()), addr)
        .await
        .unwrap();
    let mut response = vec![0; 512];
    timeout(Duration::from_secs(2), client.recv_from(&mut response))
        .await
        .expect("no response within the query budget")
        .unwrap();

    // Shutdown must complete within the query budget...
    timeout(Duration::from_secs(2), controller.shut_down())
        .await
        .expect("shutdown did not complete within the budget");

    // ...and the port must be immediately rebindable.
    let rebound = Endpoint::bind(addr)
        .await
        .expect("the port was not released by shutdown");
    assert_eq!(rebound.local_addr(), addr);
}
