// Live preview window. `q` or Esc asks the pipeline to stop.

use crate::video::rgb_to_mat;
use anyhow::Result;
use desk_watch::pipeline::{Preview, PreviewControl};
use image::RgbImage;
use opencv::{highgui, imgproc};

const KEY_ESC: i32 = 27;
const KEY_Q: i32 = 'q' as i32;

pub struct WindowPreview {
    name: String,
}

impl WindowPreview {
    pub fn open(name: &str) -> Result<Self> {
        highgui::named_window(name, highgui::WINDOW_AUTOSIZE)?;
        Ok(Self {
            name: name.to_string(),
        })
    }
}

impl Preview for WindowPreview {
    fn show(&mut self, frame: &RgbImage) -> Result<PreviewControl> {
        let bgr = rgb_to_mat(frame, imgproc::COLOR_RGB2BGR)?;
        highgui::imshow(&self.name, &bgr)?;
        let key = highgui::wait_key(1)?;
        if (key & 0xFF) == KEY_Q || key == KEY_ESC {
            Ok(PreviewControl::Stop)
        } else {
            Ok(PreviewControl::Continue)
        }
    }
}

impl Drop for WindowPreview {
    fn drop(&mut self) {
        let _ = highgui::destroy_all_windows();
    }
}
