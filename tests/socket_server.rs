use approx_tpu::arch::tpu::fp16::FP16_ONE;
use approx_tpu::arch::tpu::matrix::Matrix;
use approx_tpu::simulator::host::TpuDriver;
use approx_tpu::simulator::server::SocketServer;
use approx_tpu::simulator::sim::mode::SimConfig;
use approx_tpu::simulator::utils::log::init_log;
use approx_tpu::simulator::Simulator;
use std::fs;
use std::net::TcpStream;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

// one server at a time keeps the logs readable
static TEST_MUTEX: Mutex<()> = Mutex::new(());

fn connect(addr: std::net::SocketAddr) -> TcpStream {
  let stream = TcpStream::connect(addr).expect("Failed to connect to simulator");
  stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
  stream
}

#[test]
fn test_matmul_over_tcp() {
  let _guard = TEST_MUTEX.lock().unwrap();
  init_log();

  let trace_path = std::env::temp_dir().join(format!("approx-tpu-trace-{}.jsonl", std::process::id()));
  let config = SimConfig {
    bind: "127.0.0.1:0".to_string(),
    trace_file: Some(trace_path.to_string_lossy().to_string()),
    ..SimConfig::default()
  };
  let server = SocketServer::bind(&config.bind).expect("Failed to bind");
  let addr = server.local_addr().unwrap();

  let handle = thread::spawn(move || {
    let mut simulator = Simulator::new(config).expect("Failed to create simulator");
    simulator.serve(&server, Some(1)).expect("Simulator run failed");
    simulator.top().controller().passes()
  });

  let mut tpu = TpuDriver::new(connect(addr));
  assert_eq!(tpu.send_raw(0xFF).unwrap(), 0x55);
  let ones = Matrix::filled(FP16_ONE);
  let result = tpu.matmul(&ones, &ones).unwrap();
  assert_eq!(result, Matrix::filled(0x4800));
  drop(tpu);

  let passes = handle.join().expect("server thread panicked");
  assert_eq!(passes, 1);

  let trace = fs::read_to_string(&trace_path).unwrap();
  fs::remove_file(&trace_path).unwrap();
  let first: serde_json::Value = serde_json::from_str(trace.lines().next().unwrap()).unwrap();
  assert_eq!(first["command"], 0xFF);
  assert_eq!(first["response"], 0x55);
  // NACK, two writes, start, at least one status poll, read
  assert!(trace.lines().count() >= 6);
}

#[test]
fn test_sequential_hosts_share_state() {
  let _guard = TEST_MUTEX.lock().unwrap();
  init_log();

  let config = SimConfig {
    bind: "127.0.0.1:0".to_string(),
    sync_start: true,
    ..SimConfig::default()
  };
  let server = SocketServer::bind(&config.bind).expect("Failed to bind");
  let addr = server.local_addr().unwrap();

  let handle = thread::spawn(move || {
    let mut simulator = Simulator::new(config).expect("Failed to create simulator");
    simulator.serve(&server, Some(2)).expect("Simulator run failed");
  });

  let m = Matrix::from_fn(|r, c| (r * 8 + c) as u16);
  let mut first = TpuDriver::new(connect(addr));
  first.write_weight(&m).unwrap();
  drop(first);

  let mut second = TpuDriver::new(connect(addr));
  assert_eq!(second.read_weight().unwrap(), m);
  drop(second);

  handle.join().expect("server thread panicked");
}
