// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/server/html.rs - 操作页面
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

const STYLE: &str = r#"
  body {
    display: flex;
    flex-direction: column;
    align-items: center;
    justify-content: center;
    min-height: 100vh;
    margin: 0;
    background: #f4f4f4;
    font-family: sans-serif;
  }
  form, .controls { display: flex; gap: 10px; margin-top: 16px; align-items: center; }
  input[type="text"] { padding: 10px; font-size: 16px; border: 1px solid #ccc; border-radius: 4px; }
  .button { padding: 12px 28px; font-size: 16px; color: #fff; background: #007bff; border: none; border-radius: 4px; cursor: pointer; }
  .button:hover { background: #0056b3; }
  .feed { width: 640px; height: 480px; border: 2px solid #ddd; border-radius: 8px; }
  .state { margin-top: 8px; color: #555; }
"#;

pub fn index_page() -> String {
  format!(
    r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>Alert Setup</title>
    <style>{STYLE}</style>
  </head>
  <body>
    <h1>Enter a phone number for alerts</h1>
    <form method="post" action="/">
      <input type="text" name="phone" placeholder="+15550100" required>
      <button type="submit" class="button">Receive alerts</button>
      <a href="/video"><button type="button" class="button">View feed</button></a>
    </form>
  </body>
</html>
"#
  )
}

pub fn video_page(armed: bool) -> String {
  let state = if armed { "armed" } else { "disarmed" };
  format!(
    r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>Object Detection</title>
    <style>{STYLE}</style>
  </head>
  <body>
    <h1>Object Detection</h1>
    <img src="/video_feed" class="feed" alt="live feed">
    <div class="state">Alerts are {state}</div>
    <form method="post" action="/video">
      <button type="submit" name="on" value="1" class="button">ON</button>
      <button type="submit" name="off" value="1" class="button">OFF</button>
    </form>
  </body>
</html>
"#
  )
}
