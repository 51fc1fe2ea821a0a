//! Two stacks on an in-memory wire: a server echoes what a client sends.
//!
//! Both transports run in this process, each over its own captive IP
//! layer; the main loop shuttles messages between the two queues and
//! drives both clocks. RUST_LOG=trace shows every segment.

use std::sync::Arc;

use getopts::Options;

use ktcp::iface::{Loopback, LoopbackQueue, SystemClock};
use ktcp::socket::SockAddrIn;
use ktcp::wire::Ipv4Address;
use ktcp::{Error, Tcp};

const CLIENT_ADDR: Ipv4Address = Ipv4Address::new(10, 0, 2, 20);
const SERVER_ADDR: Ipv4Address = Ipv4Address::new(10, 0, 2, 21);

fn shuttle(from: &LoopbackQueue, to: &Arc<Tcp>) {
    let pending: Vec<_> = {
        let mut queue = from.lock().unwrap();
        std::mem::take(&mut *queue).into_iter().collect()
    };
    for msg in pending {
        to.rx(msg);
    }
}

fn main() {
    env_logger::init();

    let mut opts = Options::new();
    opts.optopt("p", "port", "server port", "PORT");
    opts.optopt("m", "message", "payload to echo", "TEXT");
    let matches = opts.parse(std::env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("echo: {err}");
        std::process::exit(2);
    });
    let port: u16 = matches
        .opt_str("p")
        .map(|p| p.parse().expect("bad port"))
        .unwrap_or(7);
    let message = matches.opt_str("m").unwrap_or_else(|| "knock knock".into());

    let client_lo = Loopback::new(CLIENT_ADDR, 1500);
    let client_queue = client_lo.queue();
    let client = Tcp::new(Box::new(client_lo), Box::<SystemClock>::default());

    let server_lo = Loopback::new(SERVER_ADDR, 1500);
    let server_queue = server_lo.queue();
    let server = Tcp::new(Box::new(server_lo), Box::<SystemClock>::default());

    let listener = server.create_socket().unwrap();
    listener.bind(&SockAddrIn::new(SERVER_ADDR, port)).unwrap();
    listener.listen(4).unwrap();

    let socket = client.create_socket().unwrap();
    let server_addr = SockAddrIn::new(SERVER_ADDR, port);
    match socket.connect(&server_addr) {
        Err(Error::Again) | Ok(()) => {}
        Err(err) => panic!("connect: {err}"),
    }

    let mut echoed = Vec::new();
    let mut accepted = None;
    let mut sent = false;
    for _ in 0..64 {
        shuttle(&client_queue, &server);
        shuttle(&server_queue, &client);
        client.tick();
        server.tick();

        if accepted.is_none() {
            accepted = listener.accept(None).ok();
        }
        if !sent && socket.connect(&server_addr).is_ok() {
            socket.send(message.as_bytes()).unwrap();
            sent = true;
        }
        if let Some(peer) = &accepted {
            let mut buf = [0u8; 512];
            if let Ok(n) = peer.recv(&mut buf) {
                if n > 0 {
                    peer.send(&buf[..n]).unwrap();
                }
            }
        }
        let mut buf = [0u8; 512];
        if let Ok(n) = socket.recv(&mut buf) {
            echoed.extend_from_slice(&buf[..n]);
        }
        if echoed.len() >= message.len() {
            break;
        }
    }

    assert_eq!(echoed, message.as_bytes());
    println!(
        "echoed {} bytes through two stacks: {:?}",
        echoed.len(),
        String::from_utf8_lossy(&echoed)
    );
}
