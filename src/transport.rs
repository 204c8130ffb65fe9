/**
    full-duplex byte exchange with the MAC-PHY

    this is the only primitive touching the hardware: `rx` receives exactly as many bytes as `tx` sends, at the same time.
    A transport never performs partial transfers, any failure is reported as an error.
*/
#[allow(async_fn_in_trait)]
pub trait Transport {
    type Error: core::fmt::Debug;

    async fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error>;
}

impl<T: Transport> Transport for &mut T {
    type Error = T::Error;

    async fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), Self::Error> {
        (**self).exchange(tx, rx).await
    }
}
