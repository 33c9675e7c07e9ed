use bytes::Bytes;
use relaycache::cache::Cache;
use relaycache::create_cache_key;
use std::time::{SystemTime, UNIX_EPOCH};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cache = Cache::new();

    let key = create_cache_key("example.com", "/index.html");

    if let Some(cached) = cache.lookup(key).await {
        println!("Cache hit! {} bytes", cached.len());
    } else {
        println!("Cache miss, fetching from upstream...");

        let response = Bytes::from(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/html\r\n\
             Cache-Control: max-age=3600\r\n\
             \r\n\
             <html><body>Hello World</body></html>",
        );
        let expires = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 3600;

        if cache
            .insert("example.com/index.html", key, response, Some(expires))
            .await
        {
            println!("Response cached successfully");
        } else {
            println!("Failed to cache (too large)");
        }
    }

    println!("Cache entries: {}", cache.len().await);
    println!("Cache size: {} bytes", cache.total_bytes());
}
