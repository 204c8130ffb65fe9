use embedded_hal_async::spi::SpiDevice;

use crate::Transport;


/// transport over an SPI device, chip select is handled by the device for each exchange
pub struct SpiTransport<S> {
    spi: S,
}
impl<S> SpiTransport<S> {
    pub fn new(spi: S) -> Self {
        Self {spi}
    }
    pub fn into_inner(self) -> S {
        self.spi
    }
}
impl<S: SpiDevice> Transport for SpiTransport<S> {
    type Error = S::Error;

    async fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error> {
        self.spi.transfer(rx, tx).await
    }
}
