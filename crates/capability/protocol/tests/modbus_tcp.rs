use domain::{ReadFailure, RegisterDescriptor, RegisterKind, RegisterSet, RegisterValues};
use ems_protocol::{
    BatchReader, ConnectionConfig, ConnectionManager, ModbusTcpTransport, ProtocolError,
    RegisterTransport,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// 本地 Modbus TCP 从站：
/// 保持寄存器值为 地址+100，输入寄存器为 地址+1000，
/// 线圈在偶数地址为 true，离散输入在 3 的倍数地址为 true，地址 1000 及以上返回非法地址异常。
#[derive(Clone, Default)]
struct DeviceBehaviour {
    /// 该起始地址的请求延迟应答
    slow: Option<(u16, Duration)>,
    /// 收到该起始地址的请求时直接断开连接
    hangup: Option<u16>,
}

struct FakeDevice {
    port: u16,
    connections: Arc<AtomicUsize>,
}

impl FakeDevice {
    async fn spawn(behaviour: DeviceBehaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let connections = Arc::new(AtomicUsize::new(0));
        let accepted = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, behaviour.clone()));
            }
        });
        Self { port, connections }
    }

    fn config(&self, timeout: Duration) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1")
            .with_port(self.port)
            .with_device_id(1)
            .with_timeout(timeout)
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve(mut stream: TcpStream, behaviour: DeviceBehaviour) {
    loop {
        let mut header = [0u8; 7];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut pdu = vec![0u8; length.saturating_sub(1)];
        if pdu.len() < 5 || stream.read_exact(&mut pdu).await.is_err() {
            return;
        }
        let function = pdu[0];
        let address = u16::from_be_bytes([pdu[1], pdu[2]]);
        let count = u16::from_be_bytes([pdu[3], pdu[4]]);

        if behaviour.hangup == Some(address) {
            return;
        }
        if let Some((slow, delay)) = behaviour.slow {
            if slow == address {
                tokio::time::sleep(delay).await;
            }
        }

        let body = respond(function, address, count);
        let mut frame = Vec::with_capacity(7 + body.len());
        frame.extend_from_slice(&header[..4]);
        frame.extend_from_slice(&((body.len() + 1) as u16).to_be_bytes());
        frame.push(header[6]);
        frame.extend_from_slice(&body);
        if stream.write_all(&frame).await.is_err() {
            return;
        }
    }
}

fn respond(function: u8, address: u16, count: u16) -> Vec<u8> {
    if u32::from(address) + u32::from(count) > 1000 {
        return vec![function | 0x80, 0x02];
    }
    let addresses = address..address + count;
    match function {
        0x03 | 0x04 => {
            let offset = if function == 0x03 { 100 } else { 1000 };
            let mut body = vec![function, (count * 2) as u8];
            for a in addresses {
                body.extend_from_slice(&(a + offset).to_be_bytes());
            }
            body
        }
        0x01 | 0x02 => {
            let modulus = if function == 0x01 { 2 } else { 3 };
            let mut packed = vec![0u8; usize::from(count).div_ceil(8)];
            for (i, a) in addresses.enumerate() {
                if a % modulus == 0 {
                    packed[i / 8] |= 1 << (i % 8);
                }
            }
            let mut body = vec![function, packed.len() as u8];
            body.extend(packed);
            body
        }
        _ => vec![function | 0x80, 0x01],
    }
}

async fn connected(
    device: &FakeDevice,
    timeout: Duration,
) -> (Arc<ModbusTcpTransport>, ConnectionManager) {
    let transport = Arc::new(ModbusTcpTransport::new());
    let mut manager = ConnectionManager::new(device.config(timeout), transport.clone());
    manager.connect().await.expect("connect");
    (transport, manager)
}

fn descriptor(address: u16, count: u16, kind: RegisterKind) -> RegisterDescriptor {
    RegisterDescriptor::new(address, count, kind, None).expect("descriptor")
}

#[tokio::test]
async fn reads_every_register_kind() {
    let device = FakeDevice::spawn(DeviceBehaviour::default()).await;
    let (_transport, manager) = connected(&device, Duration::from_secs(1)).await;
    let reader = BatchReader::new(Duration::from_secs(1));
    let session = manager.session().expect("session");

    let holding = reader
        .read(&descriptor(0, 4, RegisterKind::Holding), session)
        .await
        .expect("holding");
    assert_eq!(holding.values, RegisterValues::Words(vec![100, 101, 102, 103]));

    let input = reader
        .read(&descriptor(10, 2, RegisterKind::Input), session)
        .await
        .expect("input");
    assert_eq!(input.values, RegisterValues::Words(vec![1010, 1011]));

    let coils = reader
        .read(&descriptor(0, 5, RegisterKind::Coil), session)
        .await
        .expect("coils");
    assert_eq!(
        coils.values,
        RegisterValues::Bits(vec![true, false, true, false, true])
    );

    let discrete = reader
        .read(&descriptor(0, 4, RegisterKind::DiscreteInput), session)
        .await
        .expect("discrete inputs");
    assert_eq!(
        discrete.values,
        RegisterValues::Bits(vec![true, false, false, true])
    );
    assert_eq!(device.connections(), 1);
}

#[tokio::test]
async fn exception_response_keeps_the_session() {
    let device = FakeDevice::spawn(DeviceBehaviour::default()).await;
    let (transport, _manager) = connected(&device, Duration::from_secs(1)).await;
    let timeout = Duration::from_secs(1);

    let err = transport
        .read_holding_registers(2000, 1, timeout)
        .await
        .expect_err("illegal address");
    assert!(matches!(err, ProtocolError::Exception(_)));
    assert!(transport.is_connected());

    let values = transport
        .read_holding_registers(5, 1, timeout)
        .await
        .expect("read after exception");
    assert_eq!(values, vec![105]);
    assert_eq!(device.connections(), 1);
}

#[tokio::test]
async fn broken_link_drops_session_and_next_read_reopens() {
    let device = FakeDevice::spawn(DeviceBehaviour {
        hangup: Some(77),
        ..Default::default()
    })
    .await;
    let (transport, _manager) = connected(&device, Duration::from_secs(1)).await;
    let timeout = Duration::from_secs(1);

    let err = transport
        .read_input_registers(77, 1, timeout)
        .await
        .expect_err("hangup");
    assert!(matches!(err, ProtocolError::Transport(_)));
    assert!(!transport.is_connected());

    let values = transport
        .read_input_registers(3, 2, timeout)
        .await
        .expect("reopened session");
    assert_eq!(values, vec![1003, 1004]);
    assert!(transport.is_connected());
    assert_eq!(device.connections(), 2);
}

#[tokio::test]
async fn slow_register_does_not_fail_the_rest_of_the_batch() {
    let device = FakeDevice::spawn(DeviceBehaviour {
        slow: Some((0, Duration::from_millis(300))),
        ..Default::default()
    })
    .await;
    let timeout = Duration::from_millis(100);
    let (_transport, manager) = connected(&device, timeout).await;

    let mut registers = RegisterSet::new();
    registers
        .add_register(0, 1, RegisterKind::Holding, Some("slow".to_string()))
        .expect("add");
    registers
        .add_register(7, 1, RegisterKind::Holding, Some("fast".to_string()))
        .expect("add");
    let reader = BatchReader::new(timeout);

    // 连续两批：迟到的应答不能污染后续读取
    for _ in 0..2 {
        let readings = reader
            .read_all(&registers, manager.session().expect("session"))
            .await;
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].failure, Some(ReadFailure::Timeout));
        assert!(readings[1].is_ok(), "fast read failed: {:?}", readings[1].failure);
        assert_eq!(readings[1].values, RegisterValues::Words(vec![107]));
    }
}

#[tokio::test]
async fn disconnect_prevents_reopening() {
    let device = FakeDevice::spawn(DeviceBehaviour::default()).await;
    let (transport, mut manager) = connected(&device, Duration::from_secs(1)).await;
    transport
        .read_coils(0, 1, Duration::from_secs(1))
        .await
        .expect("read before disconnect");

    manager.disconnect().await;
    manager.disconnect().await;
    let err = transport
        .read_coils(0, 1, Duration::from_millis(200))
        .await
        .expect_err("disconnected");
    assert_eq!(err, ProtocolError::NotConnected);
    assert_eq!(device.connections(), 1);
}
