// src/hw_ssd1306.rs
//! 128×64 SSD1306 status screen on the I²C bus (rppal).

use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use greenhouse_lib::renderer::{BufferedDisplay, ScreenError};
use rppal::i2c::I2c;
use ssd1306::{mode::BufferedGraphicsMode, prelude::*, Ssd1306};

/// Control byte that prefixes display data writes
const DATA_BYTE: u8 = 0x40;

type Display =
    Ssd1306<I2CInterface<I2c>, DisplaySize128x64, BufferedGraphicsMode<DisplaySize128x64>>;

pub struct Oled {
    display: Display,
}

impl Oled {
    pub fn new(address: u8) -> Result<Self, ScreenError> {
        let i2c = I2c::new().map_err(|e| ScreenError(e.to_string()))?;
        let interface = I2CInterface::new(i2c, address, DATA_BYTE);
        let mut display = Ssd1306::new(interface, DisplaySize128x64, DisplayRotation::Rotate0)
            .into_buffered_graphics_mode();
        display
            .init()
            .map_err(|e| ScreenError(format!("init: {e:?}")))?;
        Ok(Self { display })
    }
}

impl OriginDimensions for Oled {
    fn size(&self) -> Size {
        OriginDimensions::size(&self.display)
    }
}

impl DrawTarget for Oled {
    type Color = BinaryColor;
    type Error = <Display as DrawTarget>::Error;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        self.display.draw_iter(pixels)
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        DrawTarget::clear(&mut self.display, color)
    }
}

impl BufferedDisplay for Oled {
    fn flush(&mut self) -> Result<(), Self::Error> {
        self.display.flush()
    }
}
