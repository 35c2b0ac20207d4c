//! 内嵌的浏览器页面
//!
//! 页面负责上传、下载和两种测速；服务端只把文件列表填入模板。

use crate::store::StoredFile;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::fmt::Write;

// 与浏览器 encodeURIComponent 保留的字符一致
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

const FILE_LIST_MARKER: &str = "<!--FILE_LIST-->";

/// 转义 HTML 文本和属性值
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_file_list(files: &[StoredFile]) -> String {
    if files.is_empty() {
        return r#"<div class="empty-list">No files available</div>"#.to_string();
    }

    let mut html = String::new();
    for file in files {
        let name = escape_html(&file.name);
        let href = escape_html(&utf8_percent_encode(&file.name, PATH_SEGMENT).to_string());
        let _ = write!(
            html,
            r##"<div class="file-item">
  <div class="file-name">{name}</div>
  <div class="file-info">{size} | {downloads} downloads</div>
  <a href="#" class="btn download-btn" data-filename="{name}" data-size="{bytes}">Download</a>
  <a href="/delete/{href}" class="btn delete-btn" onclick="return confirm('Delete this file?')">Delete</a>
</div>
<div class="progress" id="download-{name}"><div class="bar">0%</div></div>
"##,
            size = file.formatted_size(),
            downloads = file.downloads,
            bytes = file.size_bytes,
        );
    }
    html
}

/// 渲染首页
pub fn render_index(files: &[StoredFile]) -> String {
    PAGE_TEMPLATE.replace(FILE_LIST_MARKER, &render_file_list(files))
}

const PAGE_TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Local File Sharing</title>
<style>
  body { font-family: system-ui, Arial, sans-serif; max-width: 900px; margin: 0 auto; padding: 20px; color: #222; }
  h1, h2 { color: #333; }
  .section { margin: 24px 0; padding: 16px; background: #f5f5f5; border-radius: 6px; }
  .tabs { display: flex; gap: 4px; border-bottom: 1px solid #ddd; margin-bottom: 16px; }
  .tab { padding: 8px 18px; cursor: pointer; background: #f1f1f1; border: 1px solid #ddd; border-bottom: none; border-radius: 6px 6px 0 0; }
  .tab.active { background: #fff; margin-bottom: -1px; }
  .panel { display: none; }
  .panel.active { display: block; }
  .file-item { display: flex; align-items: center; gap: 10px; padding: 10px; border-bottom: 1px solid #eee; }
  .file-name { flex-grow: 1; word-break: break-all; }
  .file-info { color: #666; white-space: nowrap; }
  .btn { display: inline-block; padding: 5px 10px; border: none; border-radius: 3px; color: #fff; font-size: 14px; cursor: pointer; text-decoration: none; background: #2196F3; }
  .download-btn { background: #4CAF50; }
  .delete-btn { background: #f44336; }
  .empty-list { padding: 20px; color: #666; text-align: center; }
  .progress { display: none; width: 100%; background: #ddd; border-radius: 3px; margin: 8px 0; }
  .bar { width: 0%; height: 20px; line-height: 20px; background: #4CAF50; color: #fff; text-align: center; border-radius: 3px; white-space: nowrap; }
  .sizes { display: flex; gap: 10px; margin: 10px 0; }
  .sizes .btn { flex: 1; }
  .result { display: none; margin-top: 12px; padding: 10px; background: #e8f5e9; border-radius: 3px; }
  .message { display: none; padding: 10px; margin: 10px 0; border-radius: 3px; }
  .message.success { display: block; background: #dff0d8; color: #3c763d; }
  .message.error { display: block; background: #f2dede; color: #a94442; }
</style>
</head>
<body>
<h1>Local File Sharing</h1>

<div class="tabs">
  <div class="tab active" data-panel="files">Files</div>
  <div class="tab" data-panel="speedtest">Speed Test</div>
</div>

<div id="files" class="panel active">
  <div class="section">
    <h2>Upload File</h2>
    <div id="uploadMessage" class="message"></div>
    <form id="uploadForm">
      <input type="file" id="fileInput" name="file" required>
      <button type="submit" class="btn">Upload</button>
      <div class="progress" id="uploadProgress"><div class="bar">0%</div></div>
      <div id="uploadSpeed"></div>
    </form>
  </div>

  <h2>Available Files</h2>
  <div id="fileList">
<!--FILE_LIST-->
  </div>
</div>

<div id="speedtest" class="panel">
  <div class="section">
    <h2>Network Speed Test</h2>
    <h3>Download Speed</h3>
    <div class="sizes">
      <button class="btn" data-download-mb="5">5 MB</button>
      <button class="btn" data-download-mb="10">10 MB</button>
      <button class="btn" data-download-mb="25">25 MB</button>
      <button class="btn" data-download-mb="50">50 MB</button>
    </div>
    <div class="progress" id="downloadTestProgress"><div class="bar">0%</div></div>
    <div class="result" id="downloadTestResult"></div>

    <h3>Upload Speed</h3>
    <div class="sizes">
      <button class="btn" data-upload-mb="5">5 MB</button>
      <button class="btn" data-upload-mb="10">10 MB</button>
      <button class="btn" data-upload-mb="25">25 MB</button>
      <button class="btn" data-upload-mb="50">50 MB</button>
    </div>
    <div class="progress" id="uploadTestProgress"><div class="bar">0%</div></div>
    <div class="result" id="uploadTestResult"></div>
  </div>
</div>

<script>
const MIB = 1024 * 1024;

function setBar(container, percent, text) {
  const bar = container.querySelector('.bar');
  container.style.display = 'block';
  bar.style.width = percent + '%';
  bar.textContent = text === undefined ? percent + '%' : text;
}

function showResult(id, html) {
  const el = document.getElementById(id);
  el.style.display = 'block';
  el.innerHTML = html;
}

function showMessage(text, kind) {
  const el = document.getElementById('uploadMessage');
  el.textContent = text;
  el.className = 'message ' + kind;
  setTimeout(() => { el.className = 'message'; }, 5000);
}

document.querySelectorAll('.tab').forEach(tab => {
  tab.addEventListener('click', () => {
    document.querySelectorAll('.tab, .panel').forEach(el => el.classList.remove('active'));
    tab.classList.add('active');
    document.getElementById(tab.dataset.panel).classList.add('active');
  });
});

document.getElementById('uploadForm').addEventListener('submit', e => {
  e.preventDefault();
  const file = document.getElementById('fileInput').files[0];
  if (!file) {
    showMessage('Please select a file to upload', 'error');
    return;
  }
  const form = new FormData();
  form.append('file', file);

  const progress = document.getElementById('uploadProgress');
  const started = performance.now();
  const xhr = new XMLHttpRequest();
  xhr.upload.addEventListener('progress', ev => {
    if (!ev.lengthComputable) return;
    setBar(progress, Math.round(ev.loaded / ev.total * 100));
    const secs = (performance.now() - started) / 1000;
    if (secs > 0) {
      document.getElementById('uploadSpeed').textContent =
        'Current speed: ' + (ev.loaded / secs / MIB).toFixed(2) + ' MB/s';
    }
  });
  xhr.onload = () => {
    if (xhr.status !== 200) {
      showMessage('Upload failed. Server error.', 'error');
      return;
    }
    const res = JSON.parse(xhr.responseText);
    if (res.success) {
      showMessage('File uploaded successfully! ' + res.upload_speed, 'success');
      setTimeout(() => window.location.reload(), 1500);
    } else {
      showMessage('Upload failed: ' + res.message, 'error');
    }
  };
  xhr.onerror = () => showMessage('Upload failed. Network error.', 'error');
  xhr.open('POST', '/upload');
  xhr.send(form);
});

document.querySelectorAll('.download-btn').forEach(btn => {
  btn.addEventListener('click', e => {
    e.preventDefault();
    const name = btn.dataset.filename;
    const size = parseInt(btn.dataset.size, 10) || 1;
    const progress = document.getElementById('download-' + name);
    setBar(progress, 0);

    const frame = document.createElement('iframe');
    frame.style.display = 'none';
    document.body.appendChild(frame);

    // 浏览器不暴露附件下载进度，按约 50 KB/ms 粗略估算
    const started = performance.now();
    const timer = setInterval(() => {
      const estimate = Math.min(99, Math.round((performance.now() - started) / (size / 50000) * 100));
      setBar(progress, estimate);
      if (estimate >= 99) {
        clearInterval(timer);
        setTimeout(() => {
          setBar(progress, 100);
          setTimeout(() => { progress.style.display = 'none'; }, 1000);
        }, 500);
      }
    }, 100);

    frame.src = '/download/' + encodeURIComponent(name);
  });
});

async function downloadTest(sizeMb) {
  const progress = document.getElementById('downloadTestProgress');
  setBar(progress, 0, 'Generating test file...');
  let data;
  try {
    data = await (await fetch('/generate_speedtest_file/' + sizeMb)).json();
  } catch (err) {
    showResult('downloadTestResult', 'Error: ' + err);
    progress.style.display = 'none';
    return;
  }
  if (!data.success) {
    showResult('downloadTestResult', 'Failed to generate test file: ' + data.message);
    progress.style.display = 'none';
    return;
  }

  const bytes = data.size_mb * MIB;
  const started = performance.now();
  const xhr = new XMLHttpRequest();
  xhr.open('GET', '/speedtest/download/' + encodeURIComponent(data.filename));
  xhr.responseType = 'blob';
  xhr.addEventListener('progress', ev => {
    if (!ev.lengthComputable) return;
    setBar(progress, Math.round(ev.loaded / ev.total * 100));
    const secs = (performance.now() - started) / 1000;
    if (secs > 0) {
      showResult('downloadTestResult',
        `Current Download Speed: <strong>${(ev.loaded / secs / MIB).toFixed(2)} MB/s</strong><br>` +
        `Downloaded: ${Math.round(ev.loaded / MIB)}/${Math.round(ev.total / MIB)} MB`);
    }
  });
  xhr.addEventListener('load', () => {
    if (xhr.status !== 200) {
      showResult('downloadTestResult', 'Download test failed');
      return;
    }
    const secs = (performance.now() - started) / 1000;
    setBar(progress, 100);
    showResult('downloadTestResult',
      `Download Speed: <strong>${(bytes / secs / MIB).toFixed(2)} MB/s</strong><br>` +
      `Downloaded: ${data.size_mb} MB in ${secs.toFixed(2)} seconds`);
    fetch('/clean_speedtest_files');
  });
  xhr.addEventListener('error', () => {
    showResult('downloadTestResult', 'Download test failed');
    progress.style.display = 'none';
  });
  xhr.send();
}

function uploadTest(sizeMb) {
  const progress = document.getElementById('uploadTestProgress');
  const total = sizeMb * MIB;
  const chunks = [];
  let generated = 0;
  showResult('uploadTestResult', 'Preparing test data...');

  // 分块生成随机数据，避免阻塞页面
  function nextChunk() {
    if (generated >= total) {
      send();
      return;
    }
    const chunk = new Uint8Array(Math.min(MIB, total - generated));
    for (let off = 0; off < chunk.length; off += 65536) {
      crypto.getRandomValues(chunk.subarray(off, off + 65536));
    }
    chunks.push(chunk);
    generated += chunk.length;
    const percent = Math.round(generated / total * 100);
    setBar(progress, percent, 'Preparing: ' + percent + '%');
    setTimeout(nextChunk, 0);
  }

  function send() {
    const form = new FormData();
    form.append('file_size', total);
    form.append('start_time', Date.now() / 1000);
    form.append('file', new File(chunks, 'speedtest_upload.bin', { type: 'application/octet-stream' }));
    const started = Date.now() / 1000;

    const xhr = new XMLHttpRequest();
    xhr.upload.addEventListener('progress', ev => {
      if (!ev.lengthComputable) return;
      setBar(progress, Math.round(ev.loaded / ev.total * 100));
      const secs = Date.now() / 1000 - started;
      if (secs > 0) {
        showResult('uploadTestResult',
          `Current Upload Speed: <strong>${(ev.loaded / secs / MIB).toFixed(2)} MB/s</strong><br>` +
          `Uploaded: ${Math.round(ev.loaded / MIB)}/${Math.round(ev.total / MIB)} MB`);
      }
    });
    xhr.onload = () => {
      if (xhr.status !== 200) {
        showResult('uploadTestResult', 'Upload test failed. Server error.');
        return;
      }
      const res = JSON.parse(xhr.responseText);
      showResult('uploadTestResult', res.success
        ? `Upload Speed: <strong>${res.upload_speed_formatted}</strong><br>Uploaded: ${sizeMb} MB in ${res.duration}`
        : 'Upload test failed: ' + res.message);
    };
    xhr.onerror = () => showResult('uploadTestResult', 'Upload test failed. Network error.');
    xhr.open('POST', '/speedtest/upload');
    xhr.send(form);
  }

  nextChunk();
}

document.querySelectorAll('[data-download-mb]').forEach(btn =>
  btn.addEventListener('click', () => downloadTest(parseInt(btn.dataset.downloadMb, 10))));
document.querySelectorAll('[data-upload-mb]').forEach(btn =>
  btn.addEventListener('click', () => uploadTest(parseInt(btn.dataset.uploadMb, 10))));
</script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
        assert_eq!(escape_html("plain.txt"), "plain.txt");
    }

    #[test]
    fn test_empty_listing() {
        let html = render_index(&[]);
        assert!(html.contains("No files available"));
        assert!(!html.contains(FILE_LIST_MARKER));
    }

    #[test]
    fn test_listing_rows() {
        let files = vec![
            StoredFile {
                name: "notes.txt".to_string(),
                size_bytes: 2048,
                downloads: 3,
            },
            StoredFile {
                name: "<script>.js".to_string(),
                size_bytes: 10,
                downloads: 0,
            },
        ];
        let html = render_index(&files);
        assert!(html.contains(r#"<div class="file-name">notes.txt</div>"#));
        assert!(html.contains("2.0 KB | 3 downloads"));
        assert!(html.contains(r#"data-size="2048""#));
        assert!(html.contains(r#"href="/delete/notes.txt""#));
        assert!(html.contains("&lt;script&gt;.js"));
        assert!(!html.contains("No files available"));
    }

    #[test]
    fn test_delete_link_is_url_encoded() {
        let files = vec![StoredFile {
            name: "a #1?50%.txt".to_string(),
            size_bytes: 1,
            downloads: 0,
        }];
        let html = render_index(&files);
        assert!(html.contains(r#"href="/delete/a%20%231%3F50%25.txt""#));
    }
}
