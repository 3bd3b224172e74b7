//! End-to-end tests of the binary codec over in-memory buffers and real sockets.

use modaq_io::data::{Axis, DType, DataDim, DataToExport, DataWithAxes, DwaKind, NdArray, Scalar};
use modaq_io::tcpip::{AsyncSocket, ByteSink, DeSerializer, Serializer, Socket, Value};
use modaq_io::ModaqError;
use std::io::{self, Read, Write};
use std::net::TcpListener;
use std::thread;

/// Stream moving a single byte per read or write call.
struct OneByteStream {
    input: io::Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl OneByteStream {
    fn new(input: Vec<u8>) -> Self {
        Self {
            input: io::Cursor::new(input),
            output: Vec::new(),
        }
    }
}

impl Read for OneByteStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let end = buf.len().min(1);
        self.input.read(&mut buf[..end])
    }
}

impl Write for OneByteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match buf.first() {
            Some(byte) => {
                self.output.push(*byte);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn spectrum() -> DataWithAxes {
    DataWithAxes::new(
        DwaKind::DataFromPlugins,
        "spectrum",
        vec![
            NdArray::from_vec(vec![0.5f64, 1.5, 2.5, 3.5, 4.5]),
            NdArray::from_vec(vec![5.0f64, 4.0, 3.0, 2.0, 1.0]),
        ],
    )
    .unwrap()
    .with_origin("Spectrometer")
    .with_axes(vec![Axis::new("wavelength", "nm").with_data(vec![500.0, 501.0, 503.0, 506.0, 510.0])])
    .unwrap()
}

#[test]
fn test_int32_array_keeps_its_dtype() -> anyhow::Result<()> {
    let array = NdArray::from_vec(vec![1i32, 2, 3]);
    let bytes = Serializer::to_bytes(&Value::Array(array.clone()))?;

    let decoded = DeSerializer::from_bytes(bytes).ndarray_deserialization()?;
    assert_eq!(decoded.dtype(), DType::Int32);
    assert_eq!(decoded.dtype().typestr(), "<i4");
    assert_eq!(decoded.to_vec::<i32>()?, vec![1, 2, 3]);
    Ok(())
}

#[test]
fn test_dwa_round_trip_keeps_axes() -> anyhow::Result<()> {
    let dwa = DataWithAxes::new(
        DwaKind::DataWithAxes,
        "d",
        vec![NdArray::zeros(DType::Float64, &[3, 4])],
    )?
    .with_axes(vec![Axis::new("x", "").with_data(vec![0.0, 1.0, 2.0, 3.0]).with_index(1)])?;

    let mut serializer = Serializer::new();
    serializer.dwa_serialization(&dwa)?;
    let decoded = DeSerializer::from_bytes(serializer.into_bytes()).dwa_deserialization()?;

    assert_eq!(decoded.name(), "d");
    assert_eq!(decoded.dim(), DataDim::Data2D);
    assert_eq!(decoded.dim().name(), "Data2D");
    let axis = &decoded.axes()[0];
    assert_eq!(axis.label(), "x");
    assert_eq!(axis.index(), 1);
    assert_eq!(axis.get_data(), vec![0.0, 1.0, 2.0, 3.0]);
    assert_eq!(decoded, dwa);
    Ok(())
}

#[test]
fn test_consecutive_values_decode_in_order() -> anyhow::Result<()> {
    let dte = DataToExport::new("acquisition", vec![spectrum()]);
    let mut serializer = Serializer::new();
    serializer.string_serialization("Done")?;
    serializer.dte_serialization(&dte)?;
    serializer.scalar_serialization(&Scalar::from(42i64))?;
    serializer.list_serialization(&[Value::from("label"), Value::from(3.5), Value::from(true)])?;

    let mut decoder = DeSerializer::from_bytes(serializer.into_bytes());
    assert_eq!(decoder.string_deserialization()?, "Done");
    let decoded = decoder.dte_deserialization()?;
    assert_eq!(decoded.name(), "acquisition");
    assert_eq!(decoded.get(0), Some(&spectrum()));
    assert_eq!(decoded.get(0).map(DataWithAxes::origin), Some("Spectrometer"));
    assert_eq!(decoder.scalar_deserialization()?.as_i64()?, 42);
    let list = decoder.list_deserialization()?;
    assert_eq!(list[0], Value::from("label"));
    assert_eq!(list[1], Value::from(3.5));
    assert_eq!(list[2], Value::from(true));
    assert_eq!(decoder.source().remaining(), 0);

    assert!(matches!(
        decoder.string_deserialization(),
        Err(ModaqError::Transport { .. })
    ));
    Ok(())
}

#[test]
fn test_one_byte_transport_moves_whole_messages() -> anyhow::Result<()> {
    let dte = DataToExport::new("acquisition", vec![spectrum()]);
    let payload = Serializer::to_bytes(&Value::Dte(dte.clone()))?;

    let mut sender = Socket::new(OneByteStream::new(Vec::new()));
    sender.send_exact(&payload)?;
    let written = sender.into_inner().output;
    assert_eq!(written, payload);

    let receiver = Socket::new(OneByteStream::new(written)).with_chunk_size(1);
    let mut decoder = DeSerializer::new(receiver);
    assert_eq!(decoder.dte_deserialization()?, dte);
    Ok(())
}

#[test]
fn test_truncated_dte_is_a_transport_error() -> anyhow::Result<()> {
    let dte = DataToExport::new("acquisition", vec![spectrum(), spectrum().with_origin("Reference")]);
    let payload = Serializer::to_bytes(&Value::Dte(dte))?;

    for cut in [payload.len() / 3, payload.len() / 2, payload.len() - 1] {
        let receiver = Socket::new(OneByteStream::new(payload[..cut].to_vec())).with_chunk_size(5);
        let result = DeSerializer::new(receiver).dte_deserialization();
        assert!(
            matches!(result, Err(ModaqError::Transport { .. })),
            "cut at {cut}: {result:?}"
        );
    }
    Ok(())
}

#[test]
fn test_peer_closing_mid_dwa_is_a_transport_error() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let payload = Serializer::to_bytes(&Value::Dwa(spectrum()))?;
    let half = payload[..payload.len() / 2].to_vec();

    let server = thread::spawn(move || -> modaq_io::AppResult<()> {
        let (mut socket, _peer) = Socket::accept(&listener)?;
        socket.send_exact(&half)?;
        socket.close()
    });

    let mut decoder = DeSerializer::new(Socket::connect(addr)?.with_chunk_size(16));
    server.join().map_err(|_| anyhow::anyhow!("server thread panicked"))??;
    let result = decoder.dwa_deserialization();
    assert!(matches!(result, Err(ModaqError::Transport { .. })), "{result:?}");
    Ok(())
}

#[test]
fn test_tcp_request_reply() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    let server = thread::spawn(move || -> modaq_io::AppResult<String> {
        let (socket, _peer) = Socket::accept(&listener)?;
        let mut decoder = DeSerializer::new(socket);
        let command = decoder.string_deserialization()?;
        let dwa = decoder.dwa_deserialization()?;
        let mut socket = decoder.into_inner();
        socket.send_value(&Value::from(format!("{} channel(s)", dwa.length())))?;
        Ok(command)
    });

    let mut client = Socket::connect(addr)?;
    client.send_value(&Value::from("Send Data"))?;
    client.send_value(&Value::Dwa(spectrum()))?;
    let mut decoder = DeSerializer::new(client);
    let reply = decoder.string_deserialization()?;

    let command = server.join().map_err(|_| anyhow::anyhow!("server thread panicked"))??;
    assert_eq!(command, "Send Data");
    assert_eq!(reply, "2 channel(s)");
    Ok(())
}

#[test]
fn test_closed_peer_is_a_transport_error() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let server = thread::spawn(move || -> modaq_io::AppResult<()> {
        let (mut socket, _peer) = Socket::accept(&listener)?;
        socket.send_exact(&[0, 0, 0, 10, b'a', b'b'])?;
        socket.close()
    });

    let mut decoder = DeSerializer::new(Socket::connect(addr)?);
    server.join().map_err(|_| anyhow::anyhow!("server thread panicked"))??;
    let err = decoder.string_deserialization().unwrap_err();
    assert!(matches!(err, ModaqError::Transport { .. }), "{err}");
    Ok(())
}

#[tokio::test]
async fn test_async_socket_over_duplex() -> anyhow::Result<()> {
    let (left, right) = tokio::io::duplex(8);
    let mut sender = AsyncSocket::new(left);
    let mut receiver = AsyncSocket::new(right).with_chunk_size(3);

    let send = tokio::spawn(async move {
        sender.send_value(&Value::from("move_abs")).await?;
        sender.send_exact(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).await?;
        Ok::<_, ModaqError>(sender)
    });

    assert_eq!(receiver.receive_string().await?, "move_abs");
    assert_eq!(receiver.receive_exact(10).await?, (1..=10).collect::<Vec<u8>>());
    let sender = send.await??;
    drop(sender);
    assert!(matches!(
        receiver.receive_exact(1).await,
        Err(ModaqError::Transport { .. })
    ));
    Ok(())
}
