//! End to end tests for the transcript controller against a mocked
//! backend

mod test_utils;

#[cfg(test)]
mod tests {
    use std::fs;

    use mockito::Matcher;
    use serde_json::json;

    use mathlearn::backend::Role;
    use mathlearn::media::{DEFAULT_DOWNLOAD_NAME, MediaSource, VideoSurface};
    use mathlearn::session::{
        CHAT_ERROR_MESSAGE, LINKS_FALLBACK_MESSAGE, Rendered, SUBMIT_STATUS_MESSAGE,
        SessionStatus, VIDEO_FALLBACK_MESSAGE, VIDEO_READY_MESSAGE, ViewMode,
    };
    use mathlearn::upload::{ExtensionMessage, ImageAttachment};

    use crate::test_utils::{DEMO_VIDEO, media_files, test_controller};

    // "\0\0\0\x18ftypmp42", the start of an mp4 file
    const VIDEO_BASE64: &str = "AAAAGGZ0eXBtcDQy";
    const VIDEO_BYTES: &[u8] = b"\x00\x00\x00\x18ftypmp42";

    /// Tests a question producing links and a generated video
    #[tokio::test]
    async fn it_renders_links_and_video() {
        let mut server = mockito::Server::new_async().await;
        let links_body = fs::read_to_string("./tests/data/links_response.json").unwrap();

        let links_mock = server
            .mock("POST", "/links")
            .match_body(Matcher::Regex(
                "Question: What is a derivative\\?. Additional Context: Calculus 1".to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(links_body)
            .expect(1)
            .create_async()
            .await;
        let video_mock = server
            .mock("POST", "/manim")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"video_data": VIDEO_BASE64, "status": "success"}).to_string())
            .expect(1)
            .create_async()
            .await;

        let (controller, dir) = test_controller(&server.url());
        let submission = controller
            .submit("What is a derivative?", Some("Calculus 1"), None)
            .unwrap();
        assert_eq!(controller.view_mode(), ViewMode::Loading);
        submission.wait().await.unwrap();

        links_mock.assert_async().await;
        video_mock.assert_async().await;

        let transcript = controller.transcript();
        assert_eq!(transcript.len(), 5);
        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(
            transcript[0].raw,
            "Question: What is a derivative?. Additional Context: Calculus 1"
        );
        assert_eq!(transcript[1].raw, SUBMIT_STATUS_MESSAGE);

        // Links and video may arrive in either order
        let summary = transcript
            .iter()
            .position(|e| e.raw == "I found 2 helpful resources for you:")
            .unwrap();
        let rich = &transcript[summary + 1];
        assert!(rich.is_rich());
        match &rich.rendered {
            Rendered::Html(html) => {
                assert!(html.contains("https://tutorial.math.lamar.edu/Classes/CalcI/DefnOfDerivative.aspx"));
                assert!(html.contains("Relevance: 95%"));
                assert!(html.contains("Relevance: 87%"));
            }
            other => panic!("Expected html, got {:?}", other),
        }
        assert!(transcript.iter().any(|e| e.raw == VIDEO_READY_MESSAGE));

        let surface = controller.video_surface();
        let media = surface.media().unwrap();
        assert_eq!(media.source, MediaSource::Generated);
        assert_eq!(fs::read(&media.location).unwrap(), VIDEO_BYTES);
        assert_eq!(controller.session_status(), SessionStatus::Complete);
        assert_eq!(controller.view_mode(), ViewMode::Chat);
        assert!(controller.controls().submit_enabled);

        // Download the generated video
        let downloads = tempfile::tempdir().unwrap();
        let path = controller.export_video(downloads.path()).await.unwrap();
        assert_eq!(path, downloads.path().join(DEFAULT_DOWNLOAD_NAME));
        assert_eq!(fs::read(path).unwrap(), VIDEO_BYTES);

        // Starting over releases the generated video
        assert_eq!(media_files(dir.path()), 1);
        controller.reset_session();
        assert!(controller.transcript().is_empty());
        assert_eq!(media_files(dir.path()), 0);
        assert_eq!(controller.video_surface(), VideoSurface::Hidden);
        assert_eq!(controller.view_mode(), ViewMode::Placeholder);
    }

    /// Tests failures from both endpoints turn into friendly messages
    /// and the demo video
    #[tokio::test]
    async fn it_falls_back_when_the_backend_fails() {
        let mut server = mockito::Server::new_async().await;

        let _links_mock = server
            .mock("POST", "/links")
            .with_status(500)
            .create_async()
            .await;
        let _video_mock = server
            .mock("POST", "/manim")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": "error"}"#)
            .create_async()
            .await;

        let (controller, dir) = test_controller(&server.url());
        controller
            .submit("Integrate x^2", None, None)
            .unwrap()
            .wait()
            .await
            .unwrap();

        let transcript = controller.transcript();
        assert_eq!(transcript.len(), 4);
        assert_eq!(transcript[0].raw, "Integrate x^2");
        let replies: Vec<&str> = transcript[2..].iter().map(|e| e.raw.as_str()).collect();
        assert!(replies.contains(&LINKS_FALLBACK_MESSAGE));
        assert!(replies.contains(&VIDEO_FALLBACK_MESSAGE));
        assert!(transcript.iter().all(|e| !e.raw.contains("500")));

        let surface = controller.video_surface();
        assert!(!surface.is_loading());
        assert!(surface.media().unwrap().is_fallback());
        assert_eq!(media_files(dir.path()), 0);
        assert_eq!(controller.session_status(), SessionStatus::Complete);

        // The demo video is what gets downloaded
        let downloads = tempfile::tempdir().unwrap();
        let path = controller.export_video(downloads.path()).await.unwrap();
        assert_eq!(fs::read(path).unwrap(), DEMO_VIDEO);
    }

    /// Tests an unreachable backend is handled like any other failure
    #[tokio::test]
    async fn it_handles_an_unreachable_backend() {
        // Nothing listens on port 9 (discard) in the test environment
        let (controller, _dir) = test_controller("http://127.0.0.1:9");
        controller
            .submit("What is pi?", None, None)
            .unwrap()
            .wait()
            .await
            .unwrap();

        let transcript = controller.transcript();
        assert_eq!(transcript.len(), 4);
        assert!(controller.video_surface().media().unwrap().is_fallback());

        let entries = controller.send_chat_message("Hello?").await;
        assert_eq!(entries[0].raw, CHAT_ERROR_MESSAGE);
        assert!(controller.controls().send_enabled);
    }

    /// Tests an image from the upload page is sent with both requests
    #[tokio::test]
    async fn it_sends_the_uploaded_image() {
        let mut server = mockito::Server::new_async().await;

        let image_part = Matcher::AllOf(vec![
            Matcher::Regex(r#"name="image"; filename="triangle.png""#.to_string()),
            Matcher::Regex("image/png".to_string()),
        ]);
        let links_mock = server
            .mock("POST", "/links")
            .match_body(image_part.clone())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"links": [], "status": "success"}"#)
            .expect(1)
            .create_async()
            .await;
        let video_mock = server
            .mock("POST", "/manim")
            .match_body(image_part)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"video_data": VIDEO_BASE64, "status": "success"}).to_string())
            .expect(1)
            .create_async()
            .await;

        let (controller, _dir) = test_controller(&server.url());
        let image = ImageAttachment::new("triangle.png", "image/png", b"png bytes".to_vec()).unwrap();
        let message: ExtensionMessage =
            serde_json::from_value(serde_json::to_value(ExtensionMessage::image_selected(&image)).unwrap())
                .unwrap();
        controller.handle_extension_message(message).unwrap();

        // The image alone is enough to submit
        controller.submit("", None, None).unwrap().wait().await.unwrap();

        links_mock.assert_async().await;
        video_mock.assert_async().await;

        let transcript = controller.transcript();
        // No user entry without text, the status message and both results
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[0].raw, SUBMIT_STATUS_MESSAGE);
        assert!(transcript.iter().any(|e| e.raw == LINKS_FALLBACK_MESSAGE));
    }

    /// Tests results of a superseded session never reach the transcript
    #[tokio::test]
    async fn it_discards_results_of_a_superseded_session() {
        let mut server = mockito::Server::new_async().await;
        let links_body = fs::read_to_string("./tests/data/links_response.json").unwrap();

        let _links_mock = server
            .mock("POST", "/links")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(links_body)
            .create_async()
            .await;
        let _video_mock = server
            .mock("POST", "/manim")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"video_data": VIDEO_BASE64, "status": "success"}).to_string())
            .create_async()
            .await;

        let (controller, dir) = test_controller(&server.url());
        let first = controller.submit("First question", None, None).unwrap();
        let second = controller.start_session("Second question", None).unwrap();
        assert!(second > first.session_id);
        first.wait().await.unwrap();

        let transcript = controller.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].raw, "First question");
        assert_eq!(transcript[1].raw, SUBMIT_STATUS_MESSAGE);
        assert!(controller.video_surface().is_loading());
        assert_eq!(media_files(dir.path()), 0);
        assert_eq!(controller.session_status(), SessionStatus::AwaitingResults);
    }

    /// Tests a chat reply with markdown, the end sentinel and links
    #[tokio::test]
    async fn it_chats_with_markdown_replies() {
        let mut server = mockito::Server::new_async().await;

        let chat_mock = server
            .mock("POST", "/chat")
            .match_body(Matcher::Json(json!({
                "chat_history": [{"role": "user", "content": "What is a derivative?"}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "response": "## Derivative\n\nA **rate of change**. ##ADK_RESPONSE_END##",
                    "html_links": "<a href=\"https://www.khanacademy.org\" onclick=\"x()\">Khan Academy</a><script>x()</script>"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let (controller, _dir) = test_controller(&server.url());
        let entries = controller.send_chat_message("What is a derivative?").await;

        chat_mock.assert_async().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].raw, "## Derivative\n\nA **rate of change**.");
        match &entries[0].rendered {
            Rendered::Html(html) => {
                assert!(html.contains("<h2>Derivative</h2>"));
                assert!(html.contains("<strong>rate of change</strong>"));
                assert!(!html.contains("ADK_RESPONSE_END"));
            }
            other => panic!("Expected html, got {:?}", other),
        }
        assert!(entries[1].is_rich());
        assert_eq!(entries[1].raw, "1. Khan Academy\n   https://www.khanacademy.org");
        match &entries[1].rendered {
            Rendered::Html(html) => {
                assert!(html.contains(r#"<a href="https://www.khanacademy.org""#));
                assert!(!html.contains("onclick"));
                assert!(!html.contains("<script>"));
            }
            other => panic!("Expected html, got {:?}", other),
        }

        let transcript = controller.transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[0].role, Role::User);
    }

    /// Tests the full transcript is sent as history on follow ups
    #[tokio::test]
    async fn it_sends_history_with_follow_ups() {
        let mut server = mockito::Server::new_async().await;

        let _first = server
            .mock("POST", "/chat")
            .match_body(Matcher::Json(json!({
                "chat_history": [{"role": "user", "content": "What is a derivative?"}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"text": "A rate of change."}"#)
            .create_async()
            .await;
        let second = server
            .mock("POST", "/chat")
            .match_body(Matcher::Json(json!({
                "chat_history": [
                    {"role": "user", "content": "What is a derivative?"},
                    {"role": "assistant", "content": "A rate of change."},
                    {"role": "user", "content": "Give an example"}
                ]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"text": "The derivative of x^2 is 2x."}"#)
            .expect(1)
            .create_async()
            .await;

        let (controller, _dir) = test_controller(&server.url());
        controller.send_chat_message("What is a derivative?").await;
        let entries = controller.send_chat_message("Give an example").await;

        second.assert_async().await;
        assert_eq!(
            entries[0].rendered,
            Rendered::Text("The derivative of x^2 is 2x.".to_string())
        );
    }

    /// Tests a failed chat appends one apology
    #[tokio::test]
    async fn it_apologizes_when_chat_fails() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/chat")
            .with_status(503)
            .create_async()
            .await;

        let (controller, _dir) = test_controller(&server.url());
        let entries = controller.send_chat_message("Hello").await;

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].raw, CHAT_ERROR_MESSAGE);
        assert_eq!(controller.transcript().len(), 2);
        assert!(controller.controls().send_enabled);
    }
}
