//! Fixture builders shared by the import tests.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;

pub const HEADER: &str =
    "first_name,last_name,email_address,phone_number,room_number,subjects_taught,profile_picture";

/// A 4x4 PNG filled with one colour.
pub fn png_bytes(rgb: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(4, 4, image::Rgb(rgb));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

pub fn zip_bytes(files: &[(&str, Vec<u8>)]) -> Vec<u8> {
    zip_with_dirs(&[], files)
}

pub fn zip_with_dirs(dirs: &[&str], files: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for dir in dirs {
        writer.add_directory(*dir, options).unwrap();
    }
    for (name, data) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// CSV with the full header and one line per row.
pub fn csv_bytes(lines: &[&str]) -> Vec<u8> {
    let mut csv = String::from(HEADER);
    for line in lines {
        csv.push('\n');
        csv.push_str(line);
    }
    csv.push('\n');
    csv.into_bytes()
}

/// A valid CSV line for a teacher.
pub fn teacher_line(first: &str, email: &str, subjects: &str, picture: &str) -> String {
    format!("{first},Example,{email},+1-555-555-555,101,\"{subjects}\",{picture}")
}
