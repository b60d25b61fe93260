use crate::models::Lookbook;
use printpdf::*;
use std::io::BufWriter;

/// Text-only lookbook sheet: client, chosen style, final prompt and the
/// angle views that were produced. Images are not embedded.
pub fn generate_lookbook_pdf(lookbook: &Lookbook, client_name: Option<&str>) -> Result<Vec<u8>, String> {
    let (doc, page, layer) = PdfDocument::new(
        format!("Lookbook {}", lookbook.id),
        Mm(210.0),
        Mm(297.0),
        "Lookbook",
    );
    let font = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(|e| e.to_string())?;
    let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(|e| e.to_string())?;
    let sheet = doc.get_page(page).get_layer(layer);

    sheet.use_text("Design Studio Lookbook", 22.0, Mm(15.0), Mm(275.0), &bold);
    let client = client_name.unwrap_or(lookbook.client_id.as_str());
    sheet.use_text(format!("Client: {}", truncate(client, 80)), 11.0, Mm(15.0), Mm(262.0), &font);
    sheet.use_text(format!("Created: {}", lookbook.created_at.format("%Y-%m-%d %H:%M UTC")), 11.0, Mm(15.0), Mm(255.0), &font);

    sheet.use_text("Base style", 14.0, Mm(15.0), Mm(240.0), &bold);
    sheet.use_text(truncate(&lookbook.base_style.style_name, 80), 11.0, Mm(15.0), Mm(233.0), &font);
    sheet.use_text(truncate(&lookbook.base_style.prompt_used, 150), 9.0, Mm(15.0), Mm(227.0), &font);

    sheet.use_text("Final look", 14.0, Mm(15.0), Mm(212.0), &bold);
    let mut y = 205.0;
    for line in wrap(&lookbook.final_image.prompt_used, 95).iter().take(6) {
        sheet.use_text(line.as_str(), 9.0, Mm(15.0), Mm(y), &font);
        y -= 5.0;
    }

    y -= 8.0;
    sheet.use_text("Angle views", 14.0, Mm(15.0), Mm(y), &bold);
    y -= 7.0;
    if lookbook.angle_views.is_empty() {
        sheet.use_text("No angle views were produced for this look.", 10.0, Mm(15.0), Mm(y), &font);
    } else {
        for view in &lookbook.angle_views {
            sheet.use_text(format!("- {} view", view.view_label), 10.0, Mm(15.0), Mm(y), &font);
            y -= 6.0;
        }
    }

    let mut buf: Vec<u8> = Vec::new();
    {
        let mut writer = BufWriter::new(&mut buf);
        doc.save(&mut writer).map_err(|e| e.to_string())?;
    }
    Ok(buf)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max { s.to_string() } else { format!("{}…", s.chars().take(max).collect::<String>()) }
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + word.chars().count() + 1 > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AngleView, GeneratedImage, SourceImage, ViewLabel};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn renders_a_pdf_document() {
        let image = GeneratedImage {
            image_data: "aW1n".into(),
            prompt_used: "a bob cut, in a jet black color".into(),
            style_id: "bob".into(),
            style_name: "Classic Bob".into(),
            origin_style_id: None,
        };
        let lookbook = Lookbook {
            id: Uuid::new_v4(),
            client_id: "client-1".into(),
            source_image: SourceImage::new("cGhvdG8=", "image/png"),
            base_style: image.clone(),
            final_image: image,
            angle_views: vec![AngleView { view_label: ViewLabel::Back, image_data: "YmFjaw==".into() }],
            created_at: Utc::now(),
        };
        let bytes = generate_lookbook_pdf(&lookbook, Some("Ada")).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn wraps_long_prompts_on_word_boundaries() {
        let lines = wrap("one two three four five", 9);
        assert_eq!(lines, vec!["one two", "three", "four five"]);
        assert_eq!(truncate("abcdef", 3), "abc…");
    }
}
