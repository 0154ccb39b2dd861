use std::time::Duration;

use async_trait::async_trait;
use rfidcontrol::hardware::CardPacketDecoder;
use rfidcontrol::{CardId, CardReader, ControlError, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// Reads bytes from `source` until a complete card packet is decoded.
pub async fn read_card_packet<R>(source: &mut R, decoder: &mut CardPacketDecoder) -> Result<CardId>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 64];
    loop {
        let n = source
            .read(&mut buf)
            .await
            .map_err(|e| ControlError::hardware_io("card reader", e))?;
        if n == 0 {
            return Err(ControlError::hardware_io("card reader", "end of stream"));
        }
        if let Some(id) = buf[..n].iter().find_map(|b| decoder.push(*b)) {
            return Ok(id);
        }
    }
}

/// Card reader on a serial port.
pub struct SerialCardReader {
    device: String,
    port: Mutex<SerialStream>,
}

impl SerialCardReader {
    pub fn open(device: &str, baud_rate: u32) -> Result<Self> {
        let port = tokio_serial::new(device, baud_rate)
            .open_native_async()
            .map_err(|e| ControlError::hardware_io(device, e))?;
        info!(device, baud_rate, "Card reader opened");
        Ok(Self {
            device: device.to_string(),
            port: Mutex::new(port),
        })
    }
}

#[async_trait]
impl CardReader for SerialCardReader {
    async fn read_card_id(&self, timeout: Duration) -> Result<CardId> {
        let mut port = self.port.lock().await;
        // Bytes left over from an earlier card would yield a stale id.
        if let Err(e) = port.clear(ClearBuffer::Input) {
            warn!(device = %self.device, error = %e, "Failed to clear serial input");
        }

        let mut decoder = CardPacketDecoder::new();
        match tokio::time::timeout(timeout, read_card_packet(&mut *port, &mut decoder)).await {
            Ok(result) => {
                if let Ok(id) = &result {
                    debug!(card_id = %id, "Card packet decoded");
                }
                result
            }
            Err(_) => Err(ControlError::timeout("card read")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfidcontrol::hardware::CARD_PACKET_END;

    fn packet(id: &[u8; 10]) -> Vec<u8> {
        let mut p = vec![0x02];
        p.extend_from_slice(id);
        p.extend_from_slice(b"7C\r\n");
        p.push(CARD_PACKET_END);
        p
    }

    #[tokio::test]
    async fn packet_split_across_reads() {
        let bytes = packet(b"1122334455");
        let mut source = tokio_test::io::Builder::new()
            .read(&[0xff, 0x13])
            .read(&bytes[..7])
            .read(&bytes[7..])
            .build();
        let mut decoder = CardPacketDecoder::new();

        let id = read_card_packet(&mut source, &mut decoder).await.unwrap();
        assert_eq!(id.as_bytes(), b"1122334455");
    }

    #[tokio::test]
    async fn end_of_stream_is_a_hardware_error() {
        let mut source = tokio_test::io::Builder::new().read(&[0x02, 0x31]).build();
        let mut decoder = CardPacketDecoder::new();

        let err = read_card_packet(&mut source, &mut decoder).await.unwrap_err();
        assert!(matches!(err, ControlError::HardwareIo(_, _)));
    }
}
