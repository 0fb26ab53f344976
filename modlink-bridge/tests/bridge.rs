//! End-to-end tests for the Modbus TCP bridge.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_modbus::prelude::*;

use modlink_bridge::{
    BridgeServer, ContextError, FunctionCode, RegisterBlock, RegisterTransport, SerialContext,
    SlaveContext, SyntheticContext,
};
use modlink_common::decode_ipv4;

/// Start a bridge on an ephemeral loopback port.
async fn start_bridge(context: SlaveContext) -> SocketAddr {
    let server = BridgeServer::bind("127.0.0.1:0".parse().unwrap(), Arc::new(context))
        .await
        .expect("bind failed");
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.serve());
    addr
}

/// Serial transport that fails if two transactions ever overlap.
struct ExclusiveTransport {
    busy: Arc<AtomicBool>,
    completed: Arc<AtomicUsize>,
}

#[async_trait]
impl RegisterTransport for ExclusiveTransport {
    async fn read(
        &mut self,
        _function: FunctionCode,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ContextError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(ContextError::Transport("overlapping transaction".into()));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.busy.store(false, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok((address..address + count).collect())
    }

    async fn write(
        &mut self,
        _function: FunctionCode,
        _address: u16,
        _values: &[u16],
    ) -> Result<(), ContextError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(ContextError::Transport("overlapping transaction".into()));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.busy.store(false, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Serial transport whose first transaction never completes.
struct StallingTransport {
    calls: usize,
}

#[async_trait]
impl RegisterTransport for StallingTransport {
    async fn read(
        &mut self,
        _function: FunctionCode,
        _address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ContextError> {
        self.calls += 1;
        if self.calls == 1 {
            std::future::pending::<()>().await;
        }
        Ok(vec![0xABCD; count as usize])
    }

    async fn write(
        &mut self,
        _function: FunctionCode,
        _address: u16,
        _values: &[u16],
    ) -> Result<(), ContextError> {
        Ok(())
    }
}

/// Serial transport whose first transaction answers after `delay`.
struct SlowFirstTransport {
    delay: Duration,
    calls: usize,
}

#[async_trait]
impl RegisterTransport for SlowFirstTransport {
    async fn read(
        &mut self,
        _function: FunctionCode,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ContextError> {
        self.calls += 1;
        if self.calls == 1 {
            tokio::time::sleep(self.delay).await;
        }
        Ok((address..address + count).collect())
    }

    async fn write(
        &mut self,
        _function: FunctionCode,
        _address: u16,
        _values: &[u16],
    ) -> Result<(), ContextError> {
        Ok(())
    }
}

fn exclusive_context() -> (SlaveContext, Arc<AtomicUsize>) {
    let completed = Arc::new(AtomicUsize::new(0));
    let transport = ExclusiveTransport {
        busy: Arc::new(AtomicBool::new(false)),
        completed: Arc::clone(&completed),
    };
    let context = SerialContext::new(Box::new(transport), Duration::from_secs(5));
    (SlaveContext::from(context), completed)
}

#[tokio::test]
async fn test_concurrent_serial_reads_never_overlap() {
    let (context, completed) = exclusive_context();
    let context = Arc::new(context);

    let mut handles = Vec::new();
    for i in 0..8u16 {
        let context = Arc::clone(&context);
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                context
                    .get_values(FunctionCode::ReadHoldingRegisters, i, 2)
                    .await
                    .map(|_| ())
            } else {
                context
                    .set_values(FunctionCode::WriteSingleRegister, i, &[i])
                    .await
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap().expect("transaction overlapped");
    }
    assert_eq!(completed.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn test_concurrent_tcp_clients_share_serial_line() {
    let (context, completed) = exclusive_context();
    let addr = start_bridge(context).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        handles.push(tokio::spawn(async move {
            let mut ctx = tcp::connect(addr).await.unwrap();
            let mut results = Vec::new();
            for _ in 0..3 {
                results.push(ctx.read_holding_registers(5, 3).await.unwrap());
            }
            results
        }));
    }

    for handle in handles {
        for result in handle.await.unwrap() {
            assert_eq!(result, Ok(vec![5, 6, 7]));
        }
    }
    assert_eq!(completed.load(Ordering::SeqCst), 12);
}

#[tokio::test]
async fn test_timed_out_transaction_releases_serial_line() {
    let context = SerialContext::new(
        Box::new(StallingTransport { calls: 0 }),
        Duration::from_millis(50),
    );
    let context = SlaveContext::from(context);

    let first = context
        .get_values(FunctionCode::ReadHoldingRegisters, 0, 2)
        .await;
    assert!(matches!(first, Err(ContextError::Timeout(_))));

    let second = context
        .get_values(FunctionCode::ReadHoldingRegisters, 0, 2)
        .await
        .unwrap();
    assert_eq!(second, vec![0xABCD, 0xABCD]);
}

#[tokio::test]
async fn test_serial_timeout_becomes_device_failure() {
    let context = SerialContext::new(
        Box::new(StallingTransport { calls: 0 }),
        Duration::from_millis(50),
    );
    let addr = start_bridge(SlaveContext::from(context)).await;

    let mut ctx = tcp::connect(addr).await.unwrap();
    let first = ctx.read_holding_registers(0, 1).await.unwrap();
    assert_eq!(first, Err(ExceptionCode::ServerDeviceFailure));

    let second = ctx.read_holding_registers(0, 1).await.unwrap();
    assert_eq!(second, Ok(vec![0xABCD]));
}

#[tokio::test]
async fn test_abandoned_request_does_not_block_next_client() {
    let context = SerialContext::new(
        Box::new(SlowFirstTransport {
            delay: Duration::from_millis(200),
            calls: 0,
        }),
        Duration::from_secs(1),
    );
    let addr = start_bridge(SlaveContext::from(context)).await;

    let mut first = tcp::connect(addr).await.unwrap();
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), first.read_holding_registers(0, 2)).await;
    assert!(abandoned.is_err());
    drop(first);

    let mut second = tcp::connect(addr).await.unwrap();
    let values = tokio::time::timeout(Duration::from_secs(2), second.read_holding_registers(3, 2))
        .await
        .expect("second client stalled")
        .unwrap();
    assert_eq!(values, Ok(vec![3, 4]));
}

#[tokio::test]
async fn test_oversized_read_is_rejected_and_connection_survives() {
    let addr = start_bridge(SlaveContext::from(SyntheticContext::new())).await;
    let mut ctx = tcp::connect(addr).await.unwrap();

    let oversized = ctx.read_holding_registers(0, 200).await.unwrap();
    assert_eq!(oversized, Err(ExceptionCode::IllegalDataValue));

    let values = ctx.read_holding_registers(0, 2).await.unwrap().unwrap();
    assert_eq!(values.len(), 2);
}

#[tokio::test]
async fn test_synthetic_reads_and_rejected_writes() {
    let addr = start_bridge(SlaveContext::from(SyntheticContext::new())).await;
    let mut ctx = tcp::connect(addr).await.unwrap();

    let values = ctx.read_holding_registers(10, 6).await.unwrap().unwrap();
    assert_eq!(values.len(), 6);
    assert!(values.iter().all(|v| *v <= 255));

    let write = ctx.write_single_register(10, 1).await.unwrap();
    assert_eq!(write, Err(ExceptionCode::IllegalFunction));
}

#[tokio::test]
async fn test_advertised_address_over_tcp() {
    let advertised = Ipv4Addr::new(10, 8, 0, 22);
    let addr = start_bridge(SlaveContext::from(RegisterBlock::advertising(advertised))).await;
    let mut ctx = tcp::connect(addr).await.unwrap();

    let words = ctx.read_holding_registers(0, 2).await.unwrap().unwrap();
    assert_eq!(decode_ipv4([words[0], words[1]]), advertised);

    let out_of_range = ctx.read_holding_registers(1, 2).await.unwrap();
    assert_eq!(out_of_range, Err(ExceptionCode::IllegalDataAddress));

    let input = ctx.read_input_registers(0, 2).await.unwrap();
    assert_eq!(input, Err(ExceptionCode::IllegalFunction));
}

#[tokio::test]
async fn test_malformed_connection_does_not_affect_others() {
    let addr = start_bridge(SlaveContext::from(RegisterBlock::new(0, vec![1, 2]))).await;

    let mut garbage = tokio::net::TcpStream::connect(addr).await.unwrap();
    garbage
        .write_all(&[0xFF, 0xFF, 0x00, 0x07, 0x00, 0x01, 0x01])
        .await
        .unwrap();
    drop(garbage);

    let mut ctx = tcp::connect(addr).await.unwrap();
    let values = ctx.read_holding_registers(0, 2).await.unwrap();
    assert_eq!(values, Ok(vec![1, 2]));
}
